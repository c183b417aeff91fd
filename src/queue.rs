//! Unbounded MPMC queue of fixed segments.
//!
//! `SlotQueue` is the free-slot channel behind [`BlockPool`](crate::BlockPool):
//! producers recycle into it, consumers allocate out of it, all lock-free.
//! Values live in 64-slot segments; each slot walks a small state machine
//! (empty, writing, full, taken) and segments are chained through
//! reference-counted links, so a segment that the queue has moved past is
//! freed by whoever lets go of it last.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use crate::shared::{AtomicShared, Shared};

const SEG_CAP: usize = 64;

/// Slot is vacant and may be claimed by a producer.
const EMPTY: u8 = 0;
/// A producer has claimed the slot and is writing the value.
const WRITING: u8 = 1;
/// The slot holds a value ready to be consumed.
const FULL: u8 = 2;
/// The value was consumed, or the slot was sealed off.
const TAKEN: u8 = 3;

struct Slot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

struct Segment<T> {
    slots: [Slot<T>; SEG_CAP],
    next: AtomicShared<Segment<T>>,
}

impl<T> Segment<T> {
    fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot::new()),
            next: AtomicShared::null(),
        }
    }
}

impl<T> Drop for Segment<T> {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            if *slot.state.get_mut() == FULL {
                unsafe { (*slot.value.get()).assume_init_drop() };
            }
        }
    }
}

/// An unbounded multi-producer multi-consumer queue.
///
/// `push` is lock-free and allocates only when the tail segment fills up;
/// `pop` is lock-free and never blocks on an empty queue.
pub struct SlotQueue<T> {
    head: CachePadded<AtomicShared<Segment<T>>>,
    tail: CachePadded<AtomicShared<Segment<T>>>,
    len: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for SlotQueue<T> {}
unsafe impl<T: Send> Sync for SlotQueue<T> {}

impl<T> Default for SlotQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotQueue<T> {
    /// Creates an empty queue with one pre-allocated segment.
    pub fn new() -> Self {
        let seg = Shared::new(Segment::new());
        let head = AtomicShared::new(seg.clone());
        let tail = AtomicShared::new(seg);
        Self {
            head: CachePadded::new(head),
            tail: CachePadded::new(tail),
            len: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Appends a value at the back of the queue.
    pub fn push(&self, value: T) {
        let backoff = Backoff::new();
        loop {
            let tail = self.tail.load();
            let t = tail.as_ref().unwrap(); // tail is never null
            let next = t.next.load();
            if !next.is_null() {
                // Another producer appended a segment; help the tail along.
                let _ = self.tail.compare_exchange(tail.versioned(), next);
                continue;
            }
            for slot in &t.slots {
                if slot.state.load(Ordering::Acquire) == EMPTY
                    && slot
                        .state
                        .compare_exchange(EMPTY, WRITING, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                {
                    unsafe { (*slot.value.get()).write(value) };
                    slot.state.store(FULL, Ordering::Release);
                    self.len.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
            // Tail segment exhausted; race to append a fresh one. Check
            // the link first so a lost race costs no allocation.
            if t.next.load_versioned() != next.versioned() {
                continue;
            }
            let seg = Shared::new(Segment::new());
            let link = seg.clone();
            match t.next.compare_exchange(next.versioned(), seg) {
                Ok(()) => {
                    let _ = self.tail.compare_exchange(tail.versioned(), link);
                }
                Err(_lost) => {}
            }
            backoff.snooze();
        }
    }

    /// Removes the value at the front of the queue, if any.
    pub fn pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load();
            let h = head.as_ref().unwrap(); // head is never null
            let mut pending = false;
            for slot in &h.slots {
                let mut state = slot.state.load(Ordering::Acquire);
                if state == FULL {
                    if slot
                        .state
                        .compare_exchange(FULL, TAKEN, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        self.len.fetch_sub(1, Ordering::Relaxed);
                        return Some(value);
                    }
                    state = slot.state.load(Ordering::Acquire);
                }
                if state == WRITING {
                    // A producer is mid-write; its value becomes visible
                    // shortly.
                    pending = true;
                } else if state == EMPTY {
                    if h.next.load().is_null() {
                        // Reached the frontier of everything ever pushed.
                        return None;
                    }
                    // The queue has grown past this segment; seal the slot
                    // so no late write can be stranded here.
                    if slot
                        .state
                        .compare_exchange(EMPTY, TAKEN, Ordering::AcqRel, Ordering::Relaxed)
                        .is_err()
                    {
                        pending = true;
                    }
                }
            }
            if pending {
                backoff.snooze();
                continue;
            }
            // Every slot is spent; move the head to the next segment. The
            // bypassed segment is freed once its last holder lets go.
            let next = h.next.load();
            if next.is_null() {
                return None;
            }
            let _ = self.head.compare_exchange(head.versioned(), next);
        }
    }

    /// Number of values currently queued. Advisory under concurrency.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether the queue currently holds no values. Advisory under
    /// concurrency.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for SlotQueue<T> {
    fn drop(&mut self) {
        // Unlink the chain back-to-front so a long queue cannot recurse
        // through nested segment drops.
        let mut segments: Vec<*const Segment<T>> = Vec::new();
        let mut cur = self.head.load();
        loop {
            let seg = cur.as_ptr();
            if seg.is_null() {
                break;
            }
            segments.push(seg);
            cur = unsafe { &(*seg).next }.load();
        }
        for seg in segments.iter().rev() {
            unsafe { (**seg).next.unsafe_store(Shared::null()) };
        }
    }
}
