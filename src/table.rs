//! The open-addressed slot table.
//!
//! A fixed-capacity array of slot cells probed with double hashing. The
//! capacity is always a ladder prime `P`, the probe step is derived from the
//! identifier hash and is nonzero and less than `P`, so `gcd(step, P) == 1`
//! and a full probe cycle visits every slot exactly once. A probe that
//! returns to its starting index has scanned the whole table.
//!
//! Slot cells are atomic words so one writer can publish, replace, or vacate
//! an entry while lock-free readers probe concurrently. Readers pair their
//! acquire loads with the writer's release stores.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

use seize::Collector;

use crate::entry::{NodeEntry, Slot};
use crate::nodeid::NodeId;
use crate::primes::PRIMES;
use crate::store::StoreError;

/// One generation of the slot array. Replaced wholesale on resize; entries
/// are never reallocated, only their slots move.
pub(crate) struct SlotTable {
    /// Index of this table's capacity in the prime ladder.
    prime_index: usize,

    /// The slot cells. `slots.len() == PRIMES[prime_index]`.
    slots: Box<[AtomicPtr<NodeEntry>]>,
}

/// Primary probe index for `hash` in a table of `size` slots.
#[inline]
fn primary(hash: u32, size: u32) -> u32 {
    hash % size
}

/// Probe step for `hash`. In `1..size - 1`, hence coprime to the prime
/// `size`.
#[inline]
fn step(hash: u32, size: u32) -> u32 {
    1 + (hash % (size - 2))
}

impl SlotTable {
    /// Allocate an all-empty table at the given ladder rung, following the
    /// platform abort convention on allocation failure. Used for the
    /// initial table; resizes go through [`SlotTable::try_alloc`].
    pub(crate) fn alloc(prime_index: usize) -> Box<Self> {
        let size = PRIMES[prime_index] as usize;
        let slots: Vec<AtomicPtr<NodeEntry>> = (0..size).map(|_| AtomicPtr::default()).collect();
        Box::new(Self {
            prime_index,
            slots: slots.into_boxed_slice(),
        })
    }

    /// Allocate an all-empty table at the given ladder rung.
    ///
    /// Allocation is fallible so a resize under memory pressure degrades
    /// into an error instead of an abort.
    pub(crate) fn try_alloc(prime_index: usize) -> Result<Box<Self>, StoreError> {
        let size = PRIMES[prime_index] as usize;
        let mut slots: Vec<AtomicPtr<NodeEntry>> = Vec::new();
        slots
            .try_reserve_exact(size)
            .map_err(|_| StoreError::OutOfMemory)?;
        slots.resize_with(size, AtomicPtr::default);
        Ok(Box::new(Self {
            prime_index,
            slots: slots.into_boxed_slice(),
        }))
    }

    /// Number of slots (the ladder prime `P`).
    #[inline]
    pub(crate) fn size(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Ladder rung of this table's capacity.
    #[inline]
    pub(crate) fn prime_index(&self) -> usize {
        self.prime_index
    }

    /// The raw slot cells, for iteration and migration.
    #[inline]
    pub(crate) fn slots(&self) -> &[AtomicPtr<NodeEntry>] {
        &self.slots
    }

    /// Locate the slot holding `id`.
    ///
    /// Returns the slot cell and the entry it held at the time of the probe,
    /// or `None` once an empty slot terminates the sequence (the key is
    /// absent) or the probe has cycled through the full table.
    ///
    /// # Safety
    ///
    /// Every occupied slot reachable from this table must reference an entry
    /// that stays alive for the duration of the call: the caller either
    /// holds the writer lock or entered a collector guard before loading the
    /// table pointer.
    pub(crate) unsafe fn find_occupied(
        &self,
        hash: u32,
        id: &NodeId,
    ) -> Option<(&AtomicPtr<NodeEntry>, NonNull<NodeEntry>)> {
        let size = self.size();
        let step = u64::from(step(hash, size));
        // 64-bit index so the advance cannot overflow before the wrap check.
        let mut idx = u64::from(primary(hash, size));
        let start = idx;

        loop {
            let cell = &self.slots[idx as usize];
            match Slot::decode(cell.load(Ordering::Acquire)) {
                Slot::Occupied(entry) => {
                    // SAFETY: Occupied slots reference live entries per the
                    // caller contract.
                    let e = unsafe { entry.as_ref() };
                    if e.hash == hash && *e.node.node_id() == *id {
                        return Some((cell, entry));
                    }
                }
                Slot::Tombstone => {}
                Slot::Empty => return None,
            }

            idx += step;
            if idx >= u64::from(size) {
                idx -= u64::from(size);
            }
            if idx == start {
                return None;
            }
        }
    }

    /// Locate a slot where `id` may be published.
    ///
    /// Returns `None` when an entry with this identifier already occupies a
    /// slot on the probe path, or when a full cycle found neither a
    /// tombstone nor an empty slot. The earliest tombstone on the path is
    /// remembered and preferred; the probe does not stop there because the
    /// key may still live further along.
    ///
    /// # Safety
    ///
    /// Same liveness contract as [`SlotTable::find_occupied`].
    pub(crate) unsafe fn find_free_for_insert(
        &self,
        hash: u32,
        id: &NodeId,
    ) -> Option<&AtomicPtr<NodeEntry>> {
        let size = self.size();
        let step = u64::from(step(hash, size));
        let mut idx = u64::from(primary(hash, size));
        let start = idx;

        let mut candidate: Option<&AtomicPtr<NodeEntry>> = None;
        loop {
            let cell = &self.slots[idx as usize];
            match Slot::decode(cell.load(Ordering::Acquire)) {
                Slot::Occupied(entry) => {
                    // SAFETY: Occupied slots reference live entries per the
                    // caller contract.
                    let e = unsafe { entry.as_ref() };
                    if e.hash == hash && *e.node.node_id() == *id {
                        return None;
                    }
                }
                Slot::Tombstone => {
                    if candidate.is_none() {
                        candidate = Some(cell);
                    }
                }
                // No matching entry can come after an empty slot.
                Slot::Empty => return candidate.or(Some(cell)),
            }

            idx += step;
            if idx >= u64::from(size) {
                idx -= u64::from(size);
            }
            if idx == start {
                return candidate;
            }
        }
    }

    /// Re-insert every occupied entry of `old` into this (fresh, empty)
    /// table. Tombstones do not migrate. Entries keep their heap allocation;
    /// only the slot pointers move.
    ///
    /// Stores are relaxed: the table becomes visible to readers only through
    /// the subsequent release-store of the table base pointer.
    ///
    /// # Safety
    ///
    /// - `self` must not be published yet (no concurrent access).
    /// - Same entry-liveness contract as [`SlotTable::find_occupied`] for
    ///   `old`.
    pub(crate) unsafe fn migrate_from(&self, old: &SlotTable) {
        for cell in old.slots() {
            let Slot::Occupied(entry) = Slot::decode(cell.load(Ordering::Relaxed)) else {
                continue;
            };
            // SAFETY: Occupied slots reference live entries per the caller
            // contract.
            let e = unsafe { entry.as_ref() };
            // SAFETY: self is unpublished, old obeys the liveness contract.
            let free = unsafe { self.find_free_for_insert(e.hash, e.node.node_id()) };
            #[expect(
                clippy::expect_used,
                reason = "a fresh table sized for at most half load always has a free slot"
            )]
            let free = free.expect("fresh table must have a free slot");
            free.store(entry.as_ptr(), Ordering::Relaxed);
        }
    }
}

/// Reclaim a retired table generation (collector callback).
///
/// Frees the slot array only; the entries it referenced live on in the
/// successor table.
///
/// # Safety
///
/// - `ptr` must point to a table allocated via `Box::into_raw`.
/// - Must only be called after the collector determines no guard still
///   covers it.
pub(crate) unsafe fn reclaim_table(ptr: *mut SlotTable, _collector: &Collector) {
    // SAFETY: Caller guarantees ptr is valid and from Box::into_raw. The
    // collector ensures no readers remain.
    unsafe { drop(Box::from_raw(ptr)) };
}

// ============================================================================
//  Tests
// ============================================================================
