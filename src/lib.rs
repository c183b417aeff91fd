//! Petek: a lock-free concurrent sorted multiset.
//!
//! Petek keeps `(key, value)` entries in key order under concurrent
//! insertion and minimum extraction by any number of threads, with no locks
//! anywhere on the hot path.
//!
//! # Key Features
//!
//! - **Lock-Free Progress**: inserts and pops are CAS-retry loops; some
//!   thread always completes
//! - **Two-Phase Removal**: pops claim a node by tagging its link, then
//!   splice it out, so racing removers never double-extract
//! - **Pooled Nodes**: node memory comes from a fixed-block pool and goes
//!   back to it, keeping the allocator off the fast path
//! - **Pluggable Order**: extraction order is a comparator parameter;
//!   min-first and max-first ship in the box
//!
//! # Example
//!
//! ```rust
//! use petek::SortedList;
//!
//! let list: SortedList<u32, &str> = SortedList::new();
//! list.insert(7, "seven");
//! list.insert(2, "two");
//!
//! assert_eq!(list.try_peek_top_key(), Some(2));
//! assert_eq!(list.try_pop(), Some("two"));
//! assert_eq!(list.size(), 1);
//! ```
//!
//! For single-threaded workloads, [`KeyedHeap`] offers the same extraction
//! surface over a plain binary heap.

#![warn(missing_docs)]

mod heap;
mod key;
mod list;
mod pool;
mod queue;
mod shared;

pub use heap::KeyedHeap;
pub use key::{Compare, Key, MaxFirst, MinFirst};
pub use list::SortedList;
pub use pool::BlockPool;
pub use queue::SlotQueue;
