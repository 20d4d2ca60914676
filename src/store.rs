//! The node store facade.
//!
//! [`NodeMap`] maps [`NodeId`]s to [`Node`] records through the
//! open-addressed slot table. Two classes of access share the structure:
//!
//! 1. **Serialized operations** - insert, replace, remove, pinned lookups,
//!    copy-out, iteration. These take the internal writer lock; at most one
//!    runs at a time.
//! 2. **Lock-free reads** - [`NodeMap::read`] probes the table under a
//!    collector guard without locking or touching refcounts, so lookups can
//!    run from latency-critical contexts while a writer mutates the table.
//!
//! # Publication protocol
//!
//! An entry is built while unpublished (exclusively owned), then installed
//! into its slot with a release compare-and-swap. Readers pair acquire loads
//! with that store, so a reader that observes the pointer also observes the
//! entry contents. A removed or superseded entry is first unhooked from its
//! slot, then marked deleted; it is handed to the collector once the last
//! pin drops, and the collector defers the free past any guard that was
//! entered before retirement.
//!
//! # Update protocol
//!
//! Published nodes are immutable. Mutation is copy-on-write: [`NodeMap::get_copy`]
//! hands out a private deep copy remembering its origin entry, and
//! [`NodeMap::replace`] installs the copy only if the slot still holds that
//! origin. A conflicting update in between fails the replace; the caller
//! re-copies and retries.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

use parking_lot::Mutex;
use seize::{Collector, Guard, LocalGuard};

use crate::entry::{free_entry, reclaim_entry, tombstone, NodeEntry, Slot};
use crate::node::{Node, NodeClass};
use crate::nodeid::NodeId;
use crate::primes::{higher_prime_index, MIN_CAPACITY};
use crate::table::{reclaim_table, SlotTable};
use crate::tracing_helpers::{debug_log, trace_log, warn_log};

// ============================================================================
//  StoreError
// ============================================================================

/// Errors surfaced by the store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Allocation failed while building or rebuilding the slot table.
    OutOfMemory,

    /// The identifier does not name a node in the store.
    NodeIdUnknown,

    /// The identifier already names a node, or no slot could be claimed
    /// for it.
    NodeIdExists,

    /// An optimistic update lost to a conflicting change. For
    /// [`NodeMap::replace`] this means the copy is stale; re-copy with
    /// [`NodeMap::get_copy`] and retry.
    Internal,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "memory allocation failed"),

            Self::NodeIdUnknown => write!(f, "node id unknown"),

            Self::NodeIdExists => write!(f, "node id already exists"),

            Self::Internal => write!(f, "conflicting concurrent change"),
        }
    }
}

impl std::error::Error for StoreError {}

// ============================================================================
//  NodeMap
// ============================================================================

/// Writer-side bookkeeping, guarded by the writer lock.
struct WriterState {
    /// Number of occupied slots. Tombstones are not counted.
    count: u32,
}

/// A concurrently-readable hash map from [`NodeId`] to [`Node`].
///
/// # Example
///
/// ```
/// use nodestore::{NodeClass, NodeId, NodeMap};
///
/// let store = NodeMap::new();
///
/// let mut node = store.new_node(NodeClass::Object);
/// node.head_mut().node_id = NodeId::numeric(1, 42);
/// node.head_mut().display_name = "Pump".into();
/// let id = store.insert(node)?;
///
/// let pinned = store.get(&id).unwrap();
/// assert_eq!(pinned.head().display_name, "Pump");
/// store.release(pinned);
/// # Ok::<(), nodestore::StoreError>(())
/// ```
pub struct NodeMap {
    /// Epoch collector covering lock-free readers across entry retirement
    /// and table swaps.
    collector: Collector,

    /// The current slot-table generation. Swapped wholesale on resize.
    table: AtomicPtr<SlotTable>,

    /// Serializes the writer class of operations.
    writer: Mutex<WriterState>,
}

// SAFETY: All shared state is reached through the atomic table pointer, the
// atomic slot cells, and the writer mutex. Entries are published with
// release stores, read with acquire loads, and reclaimed through the
// collector only after they are unreachable and unpinned. The Node payload
// itself is Send + Sync.
unsafe impl Send for NodeMap {}
// SAFETY: As above.
unsafe impl Sync for NodeMap {}

impl NodeMap {
    /// Create an empty store at the minimum capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collector: Collector::new(),
            table: AtomicPtr::new(Box::into_raw(SlotTable::alloc(higher_prime_index(
                MIN_CAPACITY,
            )))),
            writer: Mutex::new(WriterState { count: 0 }),
        }
    }

    /// Number of nodes in the store.
    pub fn len(&self) -> u32 {
        self.writer.lock().count
    }

    /// True if the store holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current slot-table capacity (a prime from the capacity ladder).
    pub fn capacity(&self) -> u32 {
        let guard = self.guard();
        self.current_table(&guard).size()
    }

    /// Enter a collector guard.
    ///
    /// Exposed so hosts can pin an epoch across a batch of [`NodeMap::read`]
    /// calls; the per-call guard is otherwise managed internally.
    #[must_use]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    /// The current table generation.
    ///
    /// The reference is tied to `guard`, which was entered before this load:
    /// a table retired afterwards stays readable until the guard exits.
    fn current_table<'g>(&self, _guard: &'g LocalGuard<'_>) -> &'g SlotTable {
        // SAFETY: The table pointer always designates a live table. A
        // retired generation is reclaimed only after every guard entered
        // before its retirement has exited, and _guard predates this load.
        unsafe { &*self.table.load(Ordering::Acquire) }
    }
}

impl Default for NodeMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeMap")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

// ============================================================================
//  Handles
// ============================================================================

/// An unpublished, mutable node owned by the caller.
///
/// Produced by [`NodeMap::new_node`] (fresh) and [`NodeMap::get_copy`]
/// (private copy of a published node). Consumed by [`NodeMap::insert`] or
/// [`NodeMap::replace`]; dropping the handle discards the node instead.
#[must_use = "an unpublished node is discarded unless inserted or replaced"]
pub struct UnpublishedNode<'a> {
    entry: NonNull<NodeEntry>,
    _store: PhantomData<&'a NodeMap>,
}

impl UnpublishedNode<'_> {
    /// Surrender ownership of the backing entry to a store operation.
    fn into_entry(node: Self) -> NonNull<NodeEntry> {
        let entry = node.entry;
        mem::forget(node);
        entry
    }
}

impl Deref for UnpublishedNode<'_> {
    type Target = Node;

    fn deref(&self) -> &Node {
        // SAFETY: The entry is unpublished and exclusively owned by this
        // handle for its whole lifetime.
        unsafe { &self.entry.as_ref().node }
    }
}

impl DerefMut for UnpublishedNode<'_> {
    fn deref_mut(&mut self) -> &mut Node {
        // SAFETY: As in Deref; the handle is the sole owner, so mutable
        // access cannot alias.
        unsafe { &mut (*self.entry.as_ptr()).node }
    }
}

impl Drop for UnpublishedNode<'_> {
    fn drop(&mut self) {
        // SAFETY: The entry was never published; no slot or borrow can
        // reference it.
        unsafe { free_entry(self.entry) };
    }
}

impl fmt::Debug for UnpublishedNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnpublishedNode")
            .field("node_id", &self.node_id())
            .field("node_class", &self.node_class())
            .finish()
    }
}

/// A pinned, read-only borrow of a published node.
///
/// The node stays valid and immutable until the handle is dropped (or
/// passed to [`NodeMap::release`]), regardless of concurrent insertions,
/// replacements, or removals. Dropping the handle briefly takes the store's
/// writer lock to unpin.
pub struct NodeRef<'a> {
    entry: NonNull<NodeEntry>,
    store: &'a NodeMap,
}

impl Deref for NodeRef<'_> {
    type Target = Node;

    fn deref(&self) -> &Node {
        // SAFETY: The pin (refcount) taken at creation keeps the entry
        // allocated and its node immutable until the handle drops.
        unsafe { &self.entry.as_ref().node }
    }
}

impl Drop for NodeRef<'_> {
    fn drop(&mut self) {
        self.store.unpin_entry(self.entry);
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("node_id", &self.node_id())
            .field("node_class", &self.node_class())
            .finish()
    }
}

// ============================================================================
//  Allocation
// ============================================================================

impl NodeMap {
    /// Allocate an unpublished node of the given class.
    ///
    /// The caller fills in the identifier and attributes, then publishes
    /// with [`NodeMap::insert`] or discards with [`NodeMap::delete_node`].
    pub fn new_node(&self, class: NodeClass) -> UnpublishedNode<'_> {
        UnpublishedNode {
            entry: NodeEntry::alloc(class),
            _store: PhantomData,
        }
    }

    /// Discard an unpublished node.
    ///
    /// Equivalent to dropping the handle; provided for symmetry with the
    /// store interface.
    pub fn delete_node(&self, node: UnpublishedNode<'_>) {
        drop(node);
    }
}

// ============================================================================
//  Reads
// ============================================================================

impl NodeMap {
    /// Look up a node and pin it.
    ///
    /// Returns a read-only borrow that stays valid across any concurrent
    /// mutation until released.
    pub fn get(&self, id: &NodeId) -> Option<NodeRef<'_>> {
        let _writer = self.writer.lock();
        let guard = self.guard();
        let table = self.current_table(&guard);
        // SAFETY: The writer lock is held; occupied slots reference live
        // entries.
        let (_, entry) = unsafe { table.find_occupied(id.hash32(), id) }?;
        // SAFETY: The entry is published, hence allocated; pinning it under
        // the lock keeps it allocated past any later removal.
        unsafe { entry.as_ref() }.refcount.fetch_add(1, Ordering::Relaxed);
        Some(NodeRef { entry, store: self })
    }

    /// Release a pinned borrow.
    ///
    /// Equivalent to dropping the handle; provided for symmetry with the
    /// store interface.
    pub fn release(&self, node: NodeRef<'_>) {
        debug_assert!(
            std::ptr::eq(node.store, self),
            "node released to a different store"
        );
        drop(node);
    }

    /// Lock-free lookup: run `f` on the node under a collector guard.
    ///
    /// Takes no lock and no pin, so it is safe to call from contexts that
    /// must never block on the writer, while a writer mutates the table.
    /// The borrow ends when `f` returns; use [`NodeMap::get`] for a borrow
    /// that outlives the call.
    pub fn read<R>(&self, id: &NodeId, f: impl FnOnce(&Node) -> R) -> Option<R> {
        let guard = self.guard();
        let table = self.current_table(&guard);
        // SAFETY: The table was loaded under `guard`; entries it references
        // are retired no earlier than their slot is vacated, and the
        // collector keeps anything retired after guard entry readable.
        let (_, entry) = unsafe { table.find_occupied(id.hash32(), id) }?;
        // SAFETY: As above; the node is immutable while published.
        Some(f(unsafe { &entry.as_ref().node }))
    }

    /// True if the identifier names a node, without pinning it.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.read(id, |_| ()).is_some()
    }
}

// ============================================================================
//  Copy-on-write updates
// ============================================================================

impl NodeMap {
    /// Deep-copy a published node into a private, mutable, unpublished
    /// copy that remembers its origin.
    ///
    /// Feed the edited copy to [`NodeMap::replace`], or discard it with
    /// [`NodeMap::delete_node`].
    pub fn get_copy(&self, id: &NodeId) -> Result<UnpublishedNode<'_>, StoreError> {
        let _writer = self.writer.lock();
        let guard = self.guard();
        let table = self.current_table(&guard);
        // SAFETY: The writer lock is held; occupied slots reference live
        // entries.
        let (_, entry) = unsafe { table.find_occupied(id.hash32(), id) }
            .ok_or(StoreError::NodeIdUnknown)?;
        // SAFETY: As above; published nodes are immutable, so the clone
        // reads consistent data.
        let node = unsafe { entry.as_ref() }.node.clone();
        Ok(UnpublishedNode {
            entry: NodeEntry::alloc_with_node(node, entry.as_ptr()),
            _store: PhantomData,
        })
    }

    /// Publish an edited copy over its origin.
    ///
    /// The node must come from [`NodeMap::get_copy`]. Fails with
    /// [`StoreError::Internal`] if the origin was replaced in the meantime,
    /// or [`StoreError::NodeIdUnknown`] if it was removed; either way the
    /// caller re-copies and retries. The node is consumed on every path.
    pub fn replace(&self, node: UnpublishedNode<'_>) -> Result<(), StoreError> {
        let _writer = self.writer.lock();
        let guard = self.guard();
        let entry = UnpublishedNode::into_entry(node);
        // SAFETY: The entry is unpublished and exclusively owned here.
        let orig = unsafe { (*entry.as_ptr()).orig };
        debug_assert!(
            !orig.is_null(),
            "replace requires a copy produced by get_copy"
        );
        // SAFETY: As above.
        let id = unsafe { (*entry.as_ptr()).node.node_id().clone() };

        let table = self.current_table(&guard);
        // SAFETY: The writer lock is held.
        let Some((slot, current)) = (unsafe { table.find_occupied(id.hash32(), &id) }) else {
            // SAFETY: The entry was never published; ownership ends here.
            unsafe { free_entry(entry) };
            return Err(StoreError::NodeIdUnknown);
        };

        // Superseded since the copy was taken.
        if current.as_ptr() != orig {
            // SAFETY: As above.
            unsafe { free_entry(entry) };
            return Err(StoreError::Internal);
        }

        // Propagate the cached hash, then swap the slot over to the copy.
        // SAFETY: `current` is published and alive under the lock; `entry`
        // is still exclusively owned.
        unsafe { (*entry.as_ptr()).hash = (*current.as_ptr()).hash };
        if slot
            .compare_exchange(
                current.as_ptr(),
                entry.as_ptr(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // SAFETY: As above.
            unsafe { free_entry(entry) };
            return Err(StoreError::Internal);
        }

        // SAFETY: `current` stays allocated until cleanup retires it.
        unsafe { current.as_ref() }.deleted.store(true, Ordering::Relaxed);
        self.cleanup_entry(current, &guard);
        trace_log!("replaced node {id}");
        Ok(())
    }
}

// ============================================================================
//  Insert / Remove
// ============================================================================

impl NodeMap {
    /// Publish an unpublished node into the store.
    ///
    /// The node is consumed on success and on failure. A numeric identifier
    /// with value 0 is replaced by a store-assigned identifier; the
    /// effective identifier is returned.
    pub fn insert(&self, node: UnpublishedNode<'_>) -> Result<NodeId, StoreError> {
        let mut state = self.writer.lock();
        let guard = self.guard();
        let entry = UnpublishedNode::into_entry(node);

        // Pre-emptive expand at 0.75 load, so the probe below runs against
        // the final geometry. A failed expand aborts the insert.
        if u64::from(self.current_table(&guard).size()) * 3 <= u64::from(state.count) * 4
            && self.resize(&state, &guard).is_err()
        {
            // SAFETY: The entry was never published; ownership ends here.
            unsafe { free_entry(entry) };
            warn_log!("table expand failed, insert aborted");
            return Err(StoreError::Internal);
        }

        let table = self.current_table(&guard);
        // SAFETY: The entry is unpublished and exclusively owned here.
        let auto_assign = unsafe { (*entry.as_ptr()).node.node_id().requests_assignment() };
        let slot = if auto_assign {
            self.assign_numeric_id(table, entry, state.count)
        } else {
            // SAFETY: As above.
            let id = unsafe { (*entry.as_ptr()).node.node_id().clone() };
            // SAFETY: The writer lock is held.
            unsafe { table.find_free_for_insert(id.hash32(), &id) }
        };

        let Some(slot) = slot else {
            // SAFETY: As above.
            unsafe { free_entry(entry) };
            return Err(StoreError::NodeIdExists);
        };

        // SAFETY: As above.
        let id = unsafe { (*entry.as_ptr()).node.node_id().clone() };
        // Cache the hash, then publish with a release CAS so a reader that
        // observes the pointer also observes the entry contents.
        // SAFETY: As above.
        unsafe { (*entry.as_ptr()).hash = id.hash32() };
        let prev = slot.load(Ordering::Acquire);
        if slot
            .compare_exchange(prev, entry.as_ptr(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // A losing publish means an unexpected concurrent writer claimed
            // the slot; surface the duplicate-identifier outcome.
            // SAFETY: As above.
            unsafe { free_entry(entry) };
            return Err(StoreError::NodeIdExists);
        }

        state.count += 1;
        trace_log!("inserted node {id}");
        Ok(id)
    }

    /// Remove a node, tombstoning its slot.
    ///
    /// Outstanding pinned borrows keep the node's memory valid; it is
    /// reclaimed at the last release.
    pub fn remove(&self, id: &NodeId) -> Result<(), StoreError> {
        let mut state = self.writer.lock();
        let guard = self.guard();
        let table = self.current_table(&guard);
        // SAFETY: The writer lock is held.
        let Some((slot, entry)) = (unsafe { table.find_occupied(id.hash32(), id) }) else {
            return Err(StoreError::NodeIdUnknown);
        };

        if slot
            .compare_exchange(
                entry.as_ptr(),
                tombstone(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(StoreError::Internal);
        }

        // SAFETY: The entry stays allocated until cleanup retires it.
        unsafe { entry.as_ref() }.deleted.store(true, Ordering::Relaxed);
        self.cleanup_entry(entry, &guard);
        state.count -= 1;
        trace_log!("removed node {id}");

        // Downsize when the table is very empty. Failure is tolerated; the
        // store continues with the larger table.
        if u64::from(state.count) * 8 < u64::from(table.size())
            && table.size() > 32
            && self.resize(&state, &guard).is_err()
        {
            warn_log!("table shrink failed, continuing at current capacity");
        }
        Ok(())
    }
}

// ============================================================================
//  Resize engine
// ============================================================================

impl NodeMap {
    /// Rebuild the slot array when the load factor has crossed a threshold
    /// in either direction. The new capacity targets about 50% occupancy.
    ///
    /// Requires the writer lock (witnessed by `state`).
    fn resize(&self, state: &WriterState, guard: &LocalGuard<'_>) -> Result<(), StoreError> {
        let old_ptr = self.table.load(Ordering::Acquire);
        // SAFETY: The writer lock is held; the current table is live.
        let old = unsafe { &*old_ptr };
        let osize = old.size();
        let count = state.count;

        // Neither too full nor too empty: keep the current array.
        if u64::from(count) * 2 < u64::from(osize)
            && (u64::from(count) * 8 > u64::from(osize) || osize <= MIN_CAPACITY)
        {
            return Ok(());
        }

        let new = SlotTable::try_alloc(higher_prime_index(count.saturating_mul(2)))?;
        // SAFETY: `new` is unpublished; `old`'s entries are alive under the
        // writer lock. Tombstones are dropped by the migration.
        unsafe { new.migrate_from(old) };

        debug_log!("resize {osize} -> {} slots ({count} entries)", new.size());

        self.table.store(Box::into_raw(new), Ordering::Release);
        // SAFETY: The old array is unreachable for new readers; guards that
        // already captured it are covered by the collector.
        unsafe { guard.defer_retire(old_ptr, reclaim_table) };
        Ok(())
    }

    /// Walk the candidate cycle for a store-assigned numeric identifier and
    /// claim a slot for it.
    ///
    /// Candidates start above the well-known identifier range and advance
    /// by a count-derived step, wrapping against the table size so the
    /// candidate set covers every slot once before repeating. Returns
    /// `None` when the cycle is exhausted.
    fn assign_numeric_id<'t>(
        &self,
        table: &'t SlotTable,
        entry: NonNull<NodeEntry>,
        count: u32,
    ) -> Option<&'t AtomicPtr<NodeEntry>> {
        let size = u64::from(table.size());
        let mut identifier: u64 = (50_000 + size + 1) % u64::from(u32::MAX);
        let increase = u64::from(1 + ((count + 1) % (table.size() - 2)));
        let start = identifier as u32;

        // SAFETY: The entry is unpublished and exclusively owned by insert.
        let namespace = unsafe { (*entry.as_ptr()).node.node_id().namespace };

        loop {
            let candidate = NodeId::numeric(namespace, identifier as u32);
            // SAFETY: As above.
            unsafe { (*entry.as_ptr()).node.head_mut().node_id = candidate.clone() };
            // SAFETY: The writer lock is held by the caller.
            if let Some(slot) = unsafe { table.find_free_for_insert(candidate.hash32(), &candidate) }
            {
                trace_log!("assigned numeric id {candidate}");
                return Some(slot);
            }

            identifier += increase;
            if identifier >= size {
                identifier -= size;
            }
            if identifier as u32 == start {
                return None;
            }
        }
    }
}

// ============================================================================
//  Iteration
// ============================================================================

impl NodeMap {
    /// Visit every node in the store, in no particular order.
    ///
    /// Each visited entry is pinned for the duration of its visit and is
    /// internally consistent. The writer lock is released while the visitor
    /// runs, so the visitor may call back into the store (including
    /// mutations); nodes inserted during the scan may or may not be
    /// visited, and no entry is visited twice.
    pub fn iterate<F: FnMut(&Node)>(&self, mut visitor: F) {
        let guard = self.guard();
        // The scan walks the array captured here. A resize during a visit
        // retires the array, but the guard keeps it readable; entries that
        // were removed or superseded after capture carry the deleted mark
        // and are skipped.
        let table = self.current_table(&guard);
        for cell in table.slots() {
            let pinned = {
                let _writer = self.writer.lock();
                match Slot::decode(cell.load(Ordering::Acquire)) {
                    Slot::Occupied(entry) => {
                        // SAFETY: The lock is held and the guard covers the
                        // captured array; the entry is still allocated.
                        let e = unsafe { entry.as_ref() };
                        if e.deleted.load(Ordering::Relaxed) {
                            None
                        } else {
                            e.refcount.fetch_add(1, Ordering::Relaxed);
                            Some(entry)
                        }
                    }
                    Slot::Empty | Slot::Tombstone => None,
                }
            };
            let Some(entry) = pinned else { continue };

            // SAFETY: The pin keeps the entry allocated and its node
            // immutable while the visitor runs.
            let node = unsafe { &entry.as_ref().node };
            visitor(node);

            let _writer = self.writer.lock();
            // SAFETY: As above.
            unsafe { entry.as_ref() }.refcount.fetch_sub(1, Ordering::Relaxed);
            self.cleanup_entry(entry, &guard);
        }
    }
}

// ============================================================================
//  Teardown
// ============================================================================

impl NodeMap {
    /// Reclaim every node and the slot array, resetting the store to its
    /// initial capacity.
    ///
    /// Exclusive access statically guarantees no borrow, handle, or guard
    /// is outstanding.
    pub fn clear(&mut self) {
        let fresh = SlotTable::alloc(higher_prime_index(MIN_CAPACITY));
        let old = mem::replace(self.table.get_mut(), Box::into_raw(fresh));
        // SAFETY: `old` came from Box::into_raw and is unreachable now.
        drop_table(unsafe { Box::from_raw(old) });
        self.writer.get_mut().count = 0;
        debug_log!("store cleared");
    }
}

impl Drop for NodeMap {
    fn drop(&mut self) {
        // SAFETY: The table pointer came from Box::into_raw; exclusive
        // access means no reader or handle can observe it anymore. Entries
        // already retired drain when the collector drops.
        drop_table(unsafe { Box::from_raw(*self.table.get_mut()) });
    }
}

/// Free a table generation and every entry it still references.
fn drop_table(table: Box<SlotTable>) {
    for cell in table.slots() {
        if let Slot::Occupied(entry) = Slot::decode(cell.load(Ordering::Relaxed)) {
            debug_assert_eq!(
                // SAFETY: Entries in an owned table are alive.
                unsafe { entry.as_ref() }.refcount.load(Ordering::Relaxed),
                0,
                "store torn down with borrowed nodes outstanding"
            );
            // SAFETY: The table owns the last reference to the entry.
            unsafe { free_entry(entry) };
        }
    }
}

// ============================================================================
//  Internal helpers
// ============================================================================

impl NodeMap {
    /// Retire the entry once it is both superseded and unpinned.
    ///
    /// Runs under the writer lock, so the deleted+unpinned transition is
    /// observed exactly once and the entry is retired exactly once.
    fn cleanup_entry(&self, entry: NonNull<NodeEntry>, guard: &LocalGuard<'_>) {
        // SAFETY: The caller holds the writer lock and the entry is still
        // allocated.
        let e = unsafe { entry.as_ref() };
        if e.deleted.load(Ordering::Relaxed) && e.refcount.load(Ordering::Relaxed) == 0 {
            // SAFETY: No slot references the entry, no pins remain, and the
            // collector defers the free past racing guard readers.
            unsafe { guard.defer_retire(entry.as_ptr(), reclaim_entry) };
        }
    }

    /// Drop one pin from an entry, retiring it if it was the last holder of
    /// a deleted entry.
    fn unpin_entry(&self, entry: NonNull<NodeEntry>) {
        let _writer = self.writer.lock();
        let guard = self.guard();
        // SAFETY: A pinned entry is never reclaimed before its last unpin.
        let prev = unsafe { entry.as_ref() }
            .refcount
            .fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "refcount underflow");
        self.cleanup_entry(entry, &guard);
    }
}

// ============================================================================
//  Tests
// ============================================================================
