//! Fixed-block slot pool.
//!
//! `BlockPool` hands out raw slots of a fixed layout and takes them back,
//! keeping allocation off the hot path of the structures built on top of it.
//! Slots come from large blocks allocated one at a time; free slots circulate
//! through a lock-free [`SlotQueue`]. Blocks are recorded in a stack of block
//! nodes and released only when the pool itself is dropped.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};

use crate::queue::SlotQueue;

struct BlockNode {
    mem: *mut u8,
    prev: *mut BlockNode,
}

/// A pool of uniform raw memory slots.
///
/// `get` and `recycle` are lock-free and may be called from any number of
/// threads. The pool grows by whole blocks when the free queue runs dry and
/// never shrinks before it is dropped.
pub struct BlockPool {
    free: SlotQueue<usize>,
    blocks: AtomicPtr<BlockNode>,
    slot_stride: usize,
    block_layout: Layout,
    block_cap: usize,
}

unsafe impl Send for BlockPool {}
unsafe impl Sync for BlockPool {}

impl BlockPool {
    /// Creates a pool of slots fitting `slot`, grown `block_cap` slots at a
    /// time. One block is allocated eagerly.
    ///
    /// # Panics
    ///
    /// Panics if `block_cap` is zero or the block layout would overflow.
    pub fn new(slot: Layout, block_cap: usize) -> Self {
        assert!(block_cap > 0, "block capacity must be non-zero");
        let slot = slot.pad_to_align();
        let bytes = slot
            .size()
            .checked_mul(block_cap)
            .expect("block layout overflows");
        let block_layout =
            Layout::from_size_align(bytes.max(1), slot.align()).expect("block layout overflows");
        let pool = Self {
            free: SlotQueue::new(),
            blocks: AtomicPtr::new(ptr::null_mut()),
            slot_stride: slot.size(),
            block_layout,
            block_cap,
        };
        pool.try_alloc_block();
        pool
    }

    /// Fetches a free slot, growing the pool if none is available.
    ///
    /// The returned memory is uninitialised and valid until it is handed
    /// back through [`recycle`](Self::recycle) or the pool is dropped.
    pub fn get(&self) -> *mut u8 {
        loop {
            if let Some(addr) = self.free.pop() {
                return addr as *mut u8;
            }
            self.try_alloc_block();
        }
    }

    /// Returns a slot to the pool.
    ///
    /// # Safety
    ///
    /// `slot` must have been obtained from [`get`](Self::get) on this pool
    /// and must not be used after this call.
    pub unsafe fn recycle(&self, slot: *mut u8) {
        self.free.push(slot as usize);
    }

    /// Number of free slots currently pooled. Advisory under concurrency.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    fn try_alloc_block(&self) {
        let expected = self.blocks.load(Ordering::Relaxed);
        if !self.free.is_empty() {
            return;
        }
        let mem = unsafe { alloc(self.block_layout) };
        if mem.is_null() {
            handle_alloc_error(self.block_layout);
        }
        let node = Box::into_raw(Box::new(BlockNode {
            mem,
            prev: expected,
        }));
        if self
            .blocks
            .compare_exchange(expected, node, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            // Another thread grew the pool first; its slots will do.
            unsafe {
                drop(Box::from_raw(node));
                dealloc(mem, self.block_layout);
            }
            return;
        }
        for i in 0..self.block_cap {
            self.free.push(mem as usize + i * self.slot_stride);
        }
    }
}

impl Drop for BlockPool {
    fn drop(&mut self) {
        let mut node = *self.blocks.get_mut();
        while !node.is_null() {
            let block = unsafe { Box::from_raw(node) };
            unsafe { dealloc(block.mem, self.block_layout) };
            node = block.prev;
        }
    }
}
