//! # nodestore
//!
//! An in-memory, concurrently-readable store mapping structured node
//! identifiers to polymorphic node records - the address-space backing for
//! an OPC UA style information-model server.
//!
//! The map is open-addressed with double hashing over a prime-sized slot
//! table. Slot cells are atomic words, so one (internally serialized)
//! writer can publish, replace, and vacate entries while lock-free readers
//! probe concurrently; retired entries and retired slot arrays are
//! reclaimed through an epoch collector once no reader can still see them.
//!
//! ## Design
//!
//! - Published nodes are immutable. Updates are copy-on-write:
//!   [`NodeMap::get_copy`] hands out a private copy, [`NodeMap::replace`]
//!   installs it only if nothing else replaced the original in between.
//! - Lookups come in two flavors: [`NodeMap::get`] pins the node for as
//!   long as the caller needs it, [`NodeMap::read`] borrows it for a
//!   closure without locking, safe to call from latency-critical contexts.
//! - The table grows at 0.75 load and shrinks when nearly empty, always to
//!   a prime capacity so probe sequences cover every slot.
//!
//! ## Example
//!
//! ```
//! use nodestore::{NodeClass, NodeId, NodeMap};
//!
//! let store = NodeMap::new();
//!
//! let mut node = store.new_node(NodeClass::Variable);
//! node.head_mut().node_id = NodeId::string(1, "pump.speed");
//! node.head_mut().display_name = "Pump Speed".into();
//! let id = store.insert(node)?;
//!
//! // Lock-free read.
//! let name = store.read(&id, |n| n.head().display_name.clone());
//! assert_eq!(name.as_deref(), Some("Pump Speed"));
//! # Ok::<(), nodestore::StoreError>(())
//! ```

pub mod node;
pub mod nodeid;
pub mod store;

mod entry;
mod primes;
mod table;
mod tracing_helpers;

#[cfg(all(loom, test))]
mod loom_tests;

pub use node::{Node, NodeClass, NodeHead, Reference, Variant};
pub use nodeid::{Identifier, NodeId};
pub use store::{NodeMap, NodeRef, StoreError, UnpublishedNode};
