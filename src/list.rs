//! Lock-free concurrent sorted multiset.
//!
//! A key-ordered singly-linked chain anchored at a permanent front sentinel.
//! Insertion walks the chain to the first node ordering after the new key
//! and links in front of it with a versioned compare-exchange. Removal is
//! two-phase: a pop first tags the head's outgoing link, claiming the node,
//! then splices the head out of the sentinel's link. Traversals run against
//! strong snapshots, so a node stays readable until the last thread looking
//! at it moves on, and no operation ever blocks.
//!
//! The size counter doubles as an admission gate for pops: a pop buys its
//! ticket by decrementing the counter before touching the chain, which
//! bounds the number of concurrent removers by the number of linked nodes
//! and turns the empty check into a single atomic.

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::key::{Compare, Key, MinFirst};
use crate::pool::BlockPool;
use crate::shared::{AtomicShared, Shared};

/// Nodes added to the pool per growth step.
const BLOCK_CAP: usize = 128;

struct Node<K, V> {
    key: K,
    value: V,
    next: AtomicShared<Node<K, V>>,
}

unsafe fn recycle_into_pool(ctx: *const (), cell: *mut u8) {
    (*(ctx as *const BlockPool)).recycle(cell);
}

/// A concurrent sorted multiset of `(key, value)` entries.
///
/// Any number of threads may [`insert`](Self::insert), extract the current
/// minimum with [`try_pop`](Self::try_pop), or peek at the least key, all
/// without locks. Equal keys may coexist; their relative extraction order is
/// unspecified.
///
/// # Examples
///
/// ```
/// use petek::SortedList;
///
/// let list: SortedList<u64, &str> = SortedList::new();
/// list.insert(7, "seven");
/// list.insert(2, "two");
/// list.insert(5, "five");
///
/// assert_eq!(list.try_peek_top_key(), Some(2));
/// assert_eq!(list.try_pop(), Some("two"));
/// assert_eq!(list.try_pop(), Some("five"));
/// assert_eq!(list.try_pop(), Some("seven"));
/// assert_eq!(list.try_pop(), None);
/// ```
pub struct SortedList<K: Key, V, C: Compare<K> = MinFirst> {
    size: CachePadded<AtomicUsize>,
    sentinel: CachePadded<Shared<Node<K, V>>>,
    pool: Box<BlockPool>,
    compare: C,
}

unsafe impl<K, V, C> Send for SortedList<K, V, C>
where
    K: Key + Send,
    V: Send,
    C: Compare<K> + Send,
{
}

unsafe impl<K, V, C> Sync for SortedList<K, V, C>
where
    K: Key + Send + Sync,
    V: Send + Sync,
    C: Compare<K> + Sync,
{
}

impl<K: Key, V: Default, C: Compare<K> + Default> SortedList<K, V, C> {
    /// Creates an empty list with the default comparator.
    pub fn new() -> Self {
        Self::with_compare(C::default())
    }
}

impl<K: Key, V: Default, C: Compare<K> + Default> Default for SortedList<K, V, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key, V, C: Compare<K>> SortedList<K, V, C> {
    /// Creates an empty list extracting in the order defined by `compare`.
    pub fn with_compare(compare: C) -> Self
    where
        V: Default,
    {
        let pool = Box::new(BlockPool::new(
            Shared::<Node<K, V>>::cell_layout(),
            BLOCK_CAP,
        ));
        let ctx = &*pool as *const BlockPool as *const ();
        let slot = pool.get();
        // The sentinel carries no entry; its key slot holds a placeholder
        // that no traversal ever compares against.
        let sentinel = unsafe {
            Shared::new_in(
                slot,
                recycle_into_pool,
                ctx,
                Node {
                    key: K::MIN,
                    value: V::default(),
                    next: AtomicShared::null(),
                },
            )
        };
        Self {
            size: CachePadded::new(AtomicUsize::new(0)),
            sentinel: CachePadded::new(sentinel),
            pool,
            compare,
        }
    }

    fn sentry(&self) -> &Node<K, V> {
        self.sentinel.as_ref().unwrap() // the sentinel is never null
    }

    fn alloc_node(&self, key: K, value: V) -> Shared<Node<K, V>> {
        let ctx = &*self.pool as *const BlockPool as *const ();
        let slot = self.pool.get();
        unsafe {
            Shared::new_in(
                slot,
                recycle_into_pool,
                ctx,
                Node {
                    key,
                    value,
                    next: AtomicShared::null(),
                },
            )
        }
    }

    /// Current number of entries. Advisory under concurrency.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Inserts an entry at its key-ordered position.
    ///
    /// Never fails; lost races retry internally. Entries with equal keys
    /// may interleave in any order.
    pub fn insert(&self, key: K, value: V) {
        let mut entry = self.alloc_node(key, value);
        loop {
            match self.try_insert(entry) {
                Ok(()) => break,
                Err(back) => entry = back,
            }
        }
        self.size.fetch_add(1, Ordering::Relaxed);
    }

    /// One traversal-and-link attempt. Hands the entry back if the
    /// insertion point shifted underneath us.
    fn try_insert(&self, entry: Shared<Node<K, V>>) -> Result<(), Shared<Node<K, V>>> {
        let key = unsafe { (*entry.as_ptr()).key };
        // `prev` is raw; it points either at the sentinel (owned by the
        // list) or into `anchor`, which pins the node it came from.
        let mut anchor = Shared::null();
        let mut prev: *const Node<K, V> = self.sentry();
        let mut cur = self.sentry().next.load();
        loop {
            let node = cur.as_ptr();
            if node.is_null() {
                break;
            }
            if self.compare.less(&key, unsafe { &(*node).key }) {
                break;
            }
            let mut next = unsafe { &(*node).next }.load();
            if next.tag() {
                // `cur` is logically removed; splice it out before moving
                // past it.
                next.clear_tag();
                let expected = cur.versioned();
                let prev_next = unsafe { &(*prev).next };
                if prev_next.compare_exchange(expected, next).is_ok() {
                    let mut orphan = Shared::null();
                    orphan.set_tag();
                    unsafe { &(*node).next }.store(orphan);
                }
                cur = prev_next.load();
                if cur.tag() {
                    // `prev` itself has been removed underneath us; the
                    // traversal context is gone, start over.
                    return Err(entry);
                }
            } else {
                anchor = cur;
                prev = anchor.as_ptr();
                cur = next;
            }
        }
        let expected = cur.versioned();
        unsafe { (*entry.as_ptr()).next.unsafe_store(cur) };
        unsafe { &(*prev).next }.compare_exchange(expected, entry)
    }

    /// Extracts the value of the least entry.
    ///
    /// Returns `None` if the list is empty.
    pub fn try_pop(&self) -> Option<V>
    where
        V: Clone,
    {
        let mut key = K::MIN;
        self.try_pop_internal(&mut key, false)
    }

    /// Extracts the least entry as a `(key, value)` pair.
    ///
    /// Returns `None` if the list is empty.
    pub fn try_pop_entry(&self) -> Option<(K, V)>
    where
        V: Clone,
    {
        let mut key = K::MIN;
        self.try_pop_internal(&mut key, false).map(|v| (key, v))
    }

    /// Extracts the least entry only if its key equals `*expected_key`.
    ///
    /// On a key mismatch, `*expected_key` is overwritten with the observed
    /// head key and `None` is returned without removing anything. On an
    /// empty list, `None` is returned and `*expected_key` is untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use petek::SortedList;
    ///
    /// let list: SortedList<u32, u32> = SortedList::new();
    /// list.insert(4, 40);
    ///
    /// let mut expected = 3;
    /// assert_eq!(list.compare_try_pop(&mut expected), None);
    /// assert_eq!(expected, 4);
    /// assert_eq!(list.compare_try_pop(&mut expected), Some(40));
    /// ```
    pub fn compare_try_pop(&self, expected_key: &mut K) -> Option<V>
    where
        V: Clone,
    {
        self.try_pop_internal(expected_key, true)
    }

    fn try_pop_internal(&self, expected_key: &mut K, match_key: bool) -> Option<V>
    where
        V: Clone,
    {
        'admission: loop {
            // Buy the ticket first: decrement speculatively and detect the
            // below-zero wrap of the unsigned counter.
            let after = self.size.fetch_sub(1, Ordering::AcqRel).wrapping_sub(1);
            if usize::MAX - after < usize::MAX / 2 {
                self.size.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            loop {
                let head = self.sentry().next.load();
                let node = head.as_ptr();
                if node.is_null() {
                    // Ticket granted but the chain looks empty; hand the
                    // ticket back and go through admission again.
                    self.size.fetch_add(1, Ordering::Relaxed);
                    continue 'admission;
                }
                let key = unsafe { (*node).key };
                if match_key && key != *expected_key {
                    *expected_key = key;
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                // Claim the head by tagging its outgoing link; whoever
                // finds the tag clear owns this removal.
                let mut splice = unsafe { &(*node).next }.load_and_tag();
                let mine = !splice.tag();
                splice.clear_tag();
                if self
                    .sentry()
                    .next
                    .compare_exchange(head.versioned(), splice)
                    .is_ok()
                {
                    // Mark the removed node's link so an inserter still
                    // holding it as a predecessor backs off.
                    let mut orphan = Shared::null();
                    orphan.set_tag();
                    unsafe { &(*node).next }.store(orphan);
                }
                if mine {
                    *expected_key = key;
                    return Some(unsafe { &(*node).value }.clone());
                }
                // Someone else owned this head; target the next one.
            }
        }
    }

    /// Reads the least key without removing anything.
    ///
    /// The result is a hint: by the time the caller acts on it, the entry
    /// may already have been popped.
    pub fn try_peek_top_key(&self) -> Option<K> {
        self.sentry().next.load().as_ref().map(|n| n.key)
    }

    /// Removes every entry.
    ///
    /// Requires exclusive access, which rules out concurrent callers by
    /// construction. Links are cleared back-to-front so teardown never
    /// recurses down the chain.
    pub fn clear(&mut self) {
        let mut chain: Vec<*const Node<K, V>> = Vec::new();
        let mut cur = self.sentry().next.load();
        loop {
            let node = cur.as_ptr();
            if node.is_null() {
                break;
            }
            chain.push(node);
            cur = unsafe { &(*node).next }.load();
        }
        for node in chain.iter().rev() {
            unsafe { (**node).next.unsafe_store(Shared::null()) };
        }
        unsafe { self.sentry().next.unsafe_store(Shared::null()) };
        self.size.store(0, Ordering::Relaxed);
    }
}

impl<K: Key, V, C: Compare<K>> Drop for SortedList<K, V, C> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<K: Key + fmt::Debug, V, C: Compare<K>> fmt::Debug for SortedList<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortedList")
            .field("size", &self.size())
            .finish()
    }
}
