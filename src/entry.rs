//! Heap entries wrapping nodes with map metadata.
//!
//! Every published node lives in a [`NodeEntry`]: the cached identifier
//! hash, the copy-origin back-pointer, the pin count, the deleted flag, and
//! the node payload itself. Slot cells of the table store raw entry
//! pointers; two sentinel values encode the empty and tombstone states, so
//! a slot can be published, replaced, or vacated with a single-word
//! compare-and-swap.
//!
//! Entry reclamation is two-staged: a superseded or removed entry is first
//! marked `deleted` (no new pins can be taken because no slot references it
//! anymore), then handed to the collector once its pin count drops to zero.
//! Racing lock-free readers that captured the pointer earlier are covered
//! by their guard until they move on.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU32};

use seize::Collector;

use crate::node::{Node, NodeClass};

// ============================================================================
//  Slot sentinels
// ============================================================================

/// Sentinel for a vacated slot. Distinct from null and from any real entry
/// address (entries are at least 4-byte aligned).
#[inline]
pub(crate) const fn tombstone() -> *mut NodeEntry {
    ptr::without_provenance_mut(1)
}

/// Decoded state of one slot cell.
pub(crate) enum Slot {
    /// Never held an entry. Terminates probe sequences.
    Empty,

    /// Once held an entry, now vacated. Probes continue past it.
    Tombstone,

    /// References a live entry.
    Occupied(NonNull<NodeEntry>),
}

impl Slot {
    /// Decode a raw slot value into its three states.
    #[inline]
    pub(crate) fn decode(raw: *mut NodeEntry) -> Self {
        if raw.is_null() {
            Self::Empty
        } else if raw == tombstone() {
            Self::Tombstone
        } else {
            // SAFETY: raw is neither null nor the tombstone sentinel, so it
            // is a real entry pointer published by a writer.
            Self::Occupied(unsafe { NonNull::new_unchecked(raw) })
        }
    }
}

// ============================================================================
//  NodeEntry
// ============================================================================

/// A heap-allocated node wrapped with map metadata.
pub(crate) struct NodeEntry {
    /// Identifier hash, cached at publication. Probes compare this before
    /// falling back to full identifier equality.
    pub(crate) hash: u32,

    /// The entry this one was copied from, or null for fresh allocations.
    /// `replace` compares the slot occupant against this to detect a stale
    /// copy. Compared by address only, never dereferenced after the origin
    /// leaves its slot.
    pub(crate) orig: *mut NodeEntry,

    /// Outstanding pinned borrows. Adjusted only by the serialized writer
    /// class of operations.
    pub(crate) refcount: AtomicU32,

    /// Set once the entry has been superseded or removed. A deleted entry
    /// with a zero refcount is retired.
    pub(crate) deleted: AtomicBool,

    /// The node payload. Immutable from publication until reclamation.
    pub(crate) node: Node,
}

impl NodeEntry {
    /// Allocate a fresh, unpublished entry for a node of the given class.
    pub(crate) fn alloc(class: NodeClass) -> NonNull<NodeEntry> {
        let boxed = Box::new(NodeEntry {
            hash: 0,
            orig: ptr::null_mut(),
            refcount: AtomicU32::new(0),
            deleted: AtomicBool::new(false),
            node: Node::new(class),
        });
        // SAFETY: Box::into_raw never returns null.
        unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) }
    }

    /// Allocate an unpublished entry holding an already-built node.
    pub(crate) fn alloc_with_node(node: Node, orig: *mut NodeEntry) -> NonNull<NodeEntry> {
        let boxed = Box::new(NodeEntry {
            hash: 0,
            orig,
            refcount: AtomicU32::new(0),
            deleted: AtomicBool::new(false),
            node,
        });
        // SAFETY: Box::into_raw never returns null.
        unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) }
    }
}

/// Free an unpublished (or fully retired) entry directly.
///
/// # Safety
///
/// - `entry` must have been produced by [`NodeEntry::alloc`] or
///   [`NodeEntry::alloc_with_node`].
/// - No slot may reference it and no borrow may be outstanding.
pub(crate) unsafe fn free_entry(entry: NonNull<NodeEntry>) {
    // SAFETY: Caller guarantees exclusive ownership of a Box-allocated entry.
    unsafe { drop(Box::from_raw(entry.as_ptr())) };
}

/// Reclaim a retired entry (collector callback).
///
/// # Safety
///
/// - `ptr` must point to a valid entry allocated via `Box::into_raw`.
/// - Must only be called after the collector determines no guard still
///   covers it.
pub(crate) unsafe fn reclaim_entry(ptr: *mut NodeEntry, _collector: &Collector) {
    // SAFETY: Caller guarantees ptr is valid and from Box::into_raw. The
    // collector ensures no readers remain.
    unsafe { drop(Box::from_raw(ptr)) };
}

// ============================================================================
//  Tests
// ============================================================================
