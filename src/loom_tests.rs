//! Loom tests for the slot publication protocol.
//!
//! Loom provides deterministic concurrency testing by exploring all possible
//! thread interleavings. These models exercise the core slot semantics the
//! store relies on: a release-CAS publish paired with acquire loads, a
//! single CAS winner per slot, and tombstone vacation racing a reader.
//!
//! Run with: `RUSTFLAGS="--cfg loom" cargo test --lib loom_tests`
//!
//! NOTE: Loom tests are expensive - they explore all interleavings. Keep
//! the number of operations small to avoid state explosion.

use loom::sync::atomic::{AtomicPtr, Ordering};
use loom::sync::Arc;
use loom::thread;

/// Simplified entry for loom models. Payload fields are plain (non-atomic)
/// on purpose: visibility must come from the publish/observe pairing alone.
struct ModelEntry {
    hash: u32,
    payload: u64,
}

/// Tombstone sentinel, distinct from null and from any boxed entry.
fn tombstone() -> *mut ModelEntry {
    std::ptr::without_provenance_mut(1)
}

/// A reader that observes a published pointer must also observe the entry
/// contents written before the release-CAS.
#[test]
fn publish_makes_contents_visible() {
    loom::model(|| {
        let slot = Arc::new(AtomicPtr::<ModelEntry>::new(std::ptr::null_mut()));

        let writer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                let entry = Box::into_raw(Box::new(ModelEntry {
                    hash: 0xdead_beef,
                    payload: 42,
                }));
                slot.compare_exchange(
                    std::ptr::null_mut(),
                    entry,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .expect("sole writer must win the publish");
            })
        };

        let reader = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                let ptr = slot.load(Ordering::Acquire);
                if !ptr.is_null() {
                    // SAFETY: The acquire load pairs with the writer's
                    // release-CAS; the entry is fully initialized.
                    let entry = unsafe { &*ptr };
                    assert_eq!(entry.hash, 0xdead_beef);
                    assert_eq!(entry.payload, 42);
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();

        let ptr = slot.load(Ordering::Relaxed);
        // SAFETY: Both threads joined; the model owns the entry again.
        unsafe { drop(Box::from_raw(ptr)) };
    });
}

/// Two publishers racing for the same slot: exactly one CAS wins, the loser
/// observes the winner's entry.
#[test]
fn publish_has_single_winner() {
    loom::model(|| {
        let slot = Arc::new(AtomicPtr::<ModelEntry>::new(std::ptr::null_mut()));

        let spawn_publisher = |payload: u64| {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                let entry = Box::into_raw(Box::new(ModelEntry { hash: 0, payload }));
                let won = slot
                    .compare_exchange(
                        std::ptr::null_mut(),
                        entry,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                if !won {
                    // Loser keeps ownership and discards its entry.
                    // SAFETY: The entry was never published.
                    unsafe { drop(Box::from_raw(entry)) };
                }
                won
            })
        };

        let a = spawn_publisher(1);
        let b = spawn_publisher(2);
        let a_won = a.join().unwrap();
        let b_won = b.join().unwrap();
        assert!(a_won ^ b_won, "exactly one publisher must win");

        let ptr = slot.load(Ordering::Acquire);
        // SAFETY: Both threads joined; the winner's entry is in the slot.
        let winner = unsafe { &*ptr };
        assert_eq!(winner.payload, if a_won { 1 } else { 2 });
        // SAFETY: As above.
        unsafe { drop(Box::from_raw(ptr)) };
    });
}

/// A reader racing a remove sees either the live entry or the tombstone,
/// and an observed entry is still fully readable (the free is deferred
/// until after the reader is done; modeled by joining before the drop).
#[test]
fn vacate_races_reader_without_tearing() {
    loom::model(|| {
        let entry = Box::into_raw(Box::new(ModelEntry {
            hash: 7,
            payload: 99,
        }));
        let slot = Arc::new(AtomicPtr::<ModelEntry>::new(entry));

        let remover = {
            let slot = Arc::clone(&slot);
            // Raw pointers are not Send; the remover re-reads its victim
            // from the slot, as the store does under the writer lock.
            thread::spawn(move || {
                let victim = slot.load(Ordering::Acquire);
                slot.compare_exchange(victim, tombstone(), Ordering::AcqRel, Ordering::Acquire)
                    .expect("sole remover must win the vacate");
            })
        };

        let reader = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                let ptr = slot.load(Ordering::Acquire);
                if ptr.is_null() || ptr == tombstone() {
                    return None;
                }
                // SAFETY: Reclamation is deferred past this reader; the
                // entry stays readable even after the slot is vacated.
                let entry = unsafe { &*ptr };
                Some(entry.payload)
            })
        };

        remover.join().unwrap();
        let seen = reader.join().unwrap();
        assert!(matches!(seen, None | Some(99)));

        assert_eq!(slot.load(Ordering::Relaxed), tombstone());
        // Deferred reclamation happens after all readers are done.
        // SAFETY: Both threads joined; the entry is unreachable.
        unsafe { drop(Box::from_raw(entry)) };
    });
}
