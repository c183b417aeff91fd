//! Sequential binary heap with the same extraction surface as the list.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::key::{Compare, Key, MinFirst};

/// A single-threaded binary heap over `(key, value)` entries.
///
/// The non-concurrent sibling of [`SortedList`](crate::SortedList): the same
/// keyed push/pop/peek surface, backed by an array heap instead of a linked
/// chain. Mutation requires `&mut self`; only [`size`](Self::size) and
/// [`try_peek_top_key`](Self::try_peek_top_key) read through `&self`.
///
/// # Examples
///
/// ```
/// use petek::KeyedHeap;
///
/// let mut heap: KeyedHeap<u64, &str> = KeyedHeap::new();
/// heap.push(9, "nine");
/// heap.push(3, "three");
///
/// assert_eq!(heap.try_peek_top_key(), Some(3));
/// assert_eq!(heap.try_pop_entry(), Some((3, "three")));
/// assert_eq!(heap.try_pop(), Some("nine"));
/// assert_eq!(heap.try_pop(), None);
/// ```
pub struct KeyedHeap<K: Key, T, C: Compare<K> = MinFirst> {
    storage: Vec<(K, T)>,
    compare: C,
    size: AtomicUsize,
}

impl<K: Key, T, C: Compare<K> + Default> KeyedHeap<K, T, C> {
    /// Creates an empty heap with the default comparator.
    pub fn new() -> Self {
        Self::with_compare(C::default())
    }

    /// Creates an empty heap with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut heap = Self::new();
        heap.storage.reserve(capacity);
        heap
    }
}

impl<K: Key, T, C: Compare<K> + Default> Default for KeyedHeap<K, T, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key, T, C: Compare<K>> KeyedHeap<K, T, C> {
    /// Creates an empty heap extracting in the order defined by `compare`.
    pub fn with_compare(compare: C) -> Self {
        Self {
            storage: Vec::new(),
            compare,
            size: AtomicUsize::new(0),
        }
    }

    /// Current number of entries.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Adds an entry.
    pub fn push(&mut self, key: K, value: T) {
        self.storage.push((key, value));
        self.sift_up(self.storage.len() - 1);
        self.size.fetch_add(1, Ordering::Relaxed);
    }

    /// Extracts the value of the least entry, or `None` if empty.
    pub fn try_pop(&mut self) -> Option<T> {
        self.try_pop_entry().map(|(_, value)| value)
    }

    /// Extracts the least entry as a `(key, value)` pair, or `None` if
    /// empty.
    pub fn try_pop_entry(&mut self) -> Option<(K, T)> {
        if self.storage.is_empty() {
            return None;
        }
        Some(self.pop_root())
    }

    /// Extracts the least entry only if its key equals `*expected_key`.
    ///
    /// On a key mismatch, `*expected_key` is overwritten with the observed
    /// root key and nothing is removed. On an empty heap, `*expected_key`
    /// is untouched.
    pub fn compare_try_pop(&mut self, expected_key: &mut K) -> Option<T> {
        let root = self.storage.first()?.0;
        if root != *expected_key {
            *expected_key = root;
            return None;
        }
        let (key, value) = self.pop_root();
        *expected_key = key;
        Some(value)
    }

    /// Reads the least key without removing anything.
    pub fn try_peek_top_key(&self) -> Option<K> {
        self.storage.first().map(|&(key, _)| key)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.storage.clear();
        self.size.store(0, Ordering::Relaxed);
    }

    /// Reserves room for at least `additional` more entries.
    pub fn reserve(&mut self, additional: usize) {
        self.storage.reserve(additional);
    }

    /// Drops excess capacity.
    pub fn shrink_to_fit(&mut self) {
        self.storage.shrink_to_fit();
    }

    fn pop_root(&mut self) -> (K, T) {
        let entry = self.storage.swap_remove(0);
        if !self.storage.is_empty() {
            self.sift_down(0);
        }
        self.size.fetch_sub(1, Ordering::Relaxed);
        entry
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self
                .compare
                .less(&self.storage[index].0, &self.storage[parent].0)
            {
                break;
            }
            self.storage.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.storage.len();
        loop {
            let left = index * 2 + 1;
            let right = index * 2 + 2;
            let mut target = index;
            if left < len
                && self
                    .compare
                    .less(&self.storage[left].0, &self.storage[target].0)
            {
                target = left;
            }
            if right < len
                && self
                    .compare
                    .less(&self.storage[right].0, &self.storage[target].0)
            {
                target = right;
            }
            if target == index {
                break;
            }
            self.storage.swap(index, target);
            index = target;
        }
    }
}

impl<K: Key + core::fmt::Debug, T, C: Compare<K>> core::fmt::Debug for KeyedHeap<K, T, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyedHeap")
            .field("size", &self.size())
            .finish()
    }
}
