//! Split-refcount shared pointers with an atomic, taggable slot type.
//!
//! The whole crate hangs off two types: [`Shared<T>`], an owning, nullable
//! reference that carries a one-bit tag, and [`AtomicShared<T>`], an atomic
//! slot holding such a reference. A slot packs everything into one
//! `AtomicU64`:
//!
//! ```text
//!   63      56 55      48 47                                   1  0
//!  +----------+----------+--------------------------------------+---+
//!  |   loan   | version  |          cell address bits           |tag|
//!  +----------+----------+--------------------------------------+---+
//! ```
//!
//! - `tag` travels with the pointer and marks logical removal.
//! - `version` is bumped on every pointer install, so a stale
//!   `(pointer, tag, version)` witness from an earlier load can never pass a
//!   compare-exchange after the slot has been rewritten, even back to the
//!   same address.
//! - `loan` counts strong references handed out to loaders since the last
//!   install or refill.
//!
//! # Charging
//!
//! The strong count lives next to the payload in a [`Counted<T>`] cell, so
//! node payload and refcount are one allocation. Installing a pointer into a
//! slot charges the cell with [`CHARGE`] units up front: the consumed owning
//! reference brings one, the installer adds the rest. Loaders claim one unit
//! each with a single CAS that bumps the loan counter; the counter is capped
//! one short of the charge, so a live slot always retains at least one unit
//! and the cell can never be freed while any slot still points at it.
//! Uninstalling a pointer releases the unclaimed remainder,
//! `CHARGE - loan`.
//!
//! The loader whose claim saturates the loan counter owes the slot a refill:
//! it tops the cell up by `CHARGE - 1` and resets the counter. Loaders that
//! find the counter already saturated back off until the refill lands.

use core::marker::PhantomData;
use core::mem;
use core::ptr;
use core::sync::atomic::{fence, AtomicU64, AtomicUsize, Ordering};
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};

use crossbeam_utils::Backoff;

const TAG_BIT: u64 = 1;
const ADDR_MASK: u64 = 0x0000_FFFF_FFFF_FFFE;
const VERSION_SHIFT: u32 = 48;
const LOAN_SHIFT: u32 = 56;
const LOAN_ONE: u64 = 1 << LOAN_SHIFT;
const LOAN_MASK: u64 = 0xFF << LOAN_SHIFT;
const LOAN_CAP: u64 = 0xFF;

/// Identity bits of a word: address, tag, and version, with the loan
/// counter masked out.
const IDENT_MASK: u64 = !LOAN_MASK;

/// Strong units granted to a slot per install or refill cycle.
const CHARGE: usize = 256;

#[inline]
fn word_addr(word: u64) -> u64 {
    word & ADDR_MASK
}

#[inline]
fn word_loan(word: u64) -> u64 {
    (word & LOAN_MASK) >> LOAN_SHIFT
}

#[inline]
fn next_version(word: u64) -> u64 {
    let v = ((word >> VERSION_SHIFT) as u8).wrapping_add(1);
    ((v as u64) << VERSION_SHIFT) & !LOAN_MASK
}

/// Disposal route for a cell whose strong count reached zero. Receives the
/// context pointer stored in the cell and the cell's own address.
pub(crate) type FreeFn = unsafe fn(ctx: *const (), cell: *mut u8);

/// A payload together with its co-located strong count and disposal route.
///
/// `#[repr(C)]` so that the cell address is also the allocation address
/// handed back to `free`.
#[repr(C)]
pub(crate) struct Counted<T> {
    strong: AtomicUsize,
    free: FreeFn,
    ctx: *const (),
    data: T,
}

/// Drops the payload and hands the memory back to wherever it came from.
///
/// # Safety
///
/// Must be called exactly once, after the strong count reached zero.
unsafe fn dispose<T>(cell: *mut Counted<T>) {
    let free = (*cell).free;
    let ctx = (*cell).ctx;
    ptr::drop_in_place(cell);
    free(ctx, cell as *mut u8);
}

/// Removes `units` strong units from a cell, disposing of it on zero.
///
/// # Safety
///
/// The caller must own at least `units` units of the cell's strong count.
unsafe fn release<T>(cell: *mut Counted<T>, units: usize) {
    if (*cell).strong.fetch_sub(units, Ordering::Release) == units {
        fence(Ordering::Acquire);
        dispose(cell);
    }
}

/// Releases the charge still held by an uninstalled slot word.
///
/// # Safety
///
/// `old` must have just been removed from a slot that held its charge.
unsafe fn uninstall<T>(old: u64) {
    let cell = word_addr(old) as *mut Counted<T>;
    if !cell.is_null() {
        release(cell, CHARGE - word_loan(old) as usize);
    }
}

unsafe fn free_global<T>(_ctx: *const (), cell: *mut u8) {
    dealloc(cell, Layout::new::<Counted<T>>());
}

/// An owning, nullable shared reference carrying a tag bit and the version
/// it was loaded with.
///
/// A non-null `Shared` owns one strong unit of its cell; dropping the last
/// unit disposes of the cell. The tag bit is local state: flipping it on a
/// `Shared` does not touch any slot.
pub(crate) struct Shared<T> {
    word: u64,
    _marker: PhantomData<*mut Counted<T>>,
}

unsafe impl<T: Send + Sync> Send for Shared<T> {}
unsafe impl<T: Send + Sync> Sync for Shared<T> {}

impl<T> Shared<T> {
    /// The null reference.
    pub(crate) fn null() -> Self {
        Self {
            word: 0,
            _marker: PhantomData,
        }
    }

    /// Allocates a cell from the global allocator and takes ownership of it.
    pub(crate) fn new(value: T) -> Self {
        let layout = Layout::new::<Counted<T>>();
        let cell = unsafe { alloc(layout) } as *mut Counted<T>;
        if cell.is_null() {
            handle_alloc_error(layout);
        }
        unsafe { Self::write_cell(cell, free_global::<T>, ptr::null(), value) }
    }

    /// Builds a cell in caller-provided memory, typically a pool slot.
    ///
    /// # Safety
    ///
    /// `slot` must be valid for writes of [`Self::cell_layout()`] and stay
    /// valid until `free(ctx, slot)` is invoked; `free` must release it.
    pub(crate) unsafe fn new_in(slot: *mut u8, free: FreeFn, ctx: *const (), value: T) -> Self {
        Self::write_cell(slot as *mut Counted<T>, free, ctx, value)
    }

    unsafe fn write_cell(cell: *mut Counted<T>, free: FreeFn, ctx: *const (), value: T) -> Self {
        debug_assert_eq!(cell as u64 & !ADDR_MASK, 0, "cell address out of packing range");
        cell.write(Counted {
            strong: AtomicUsize::new(1),
            free,
            ctx,
            data: value,
        });
        Self {
            word: cell as u64,
            _marker: PhantomData,
        }
    }

    /// The memory layout of one cell, for sizing pool slots.
    pub(crate) fn cell_layout() -> Layout {
        Layout::new::<Counted<T>>()
    }

    fn cell(&self) -> *mut Counted<T> {
        word_addr(self.word) as *mut Counted<T>
    }

    pub(crate) fn is_null(&self) -> bool {
        word_addr(self.word) == 0
    }

    /// The tag bit carried by this reference.
    pub(crate) fn tag(&self) -> bool {
        self.word & TAG_BIT != 0
    }

    pub(crate) fn set_tag(&mut self) {
        self.word |= TAG_BIT;
    }

    pub(crate) fn clear_tag(&mut self) {
        self.word &= !TAG_BIT;
    }

    /// Raw pointer to the payload, null for the null reference.
    pub(crate) fn as_ptr(&self) -> *const T {
        let cell = self.cell();
        if cell.is_null() {
            ptr::null()
        } else {
            unsafe { ptr::addr_of!((*cell).data) }
        }
    }

    /// Borrows the payload. The reference is pinned for as long as this
    /// `Shared` lives, so this is safe.
    pub(crate) fn as_ref(&self) -> Option<&T> {
        unsafe { self.as_ptr().as_ref() }
    }

    /// The non-owning `(pointer, tag, version)` witness of this reference,
    /// for use as a compare-exchange expectation.
    pub(crate) fn versioned(&self) -> Versioned<T> {
        Versioned {
            word: self.word & IDENT_MASK,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        let cell = self.cell();
        if !cell.is_null() {
            unsafe { (*cell).strong.fetch_add(1, Ordering::Relaxed) };
        }
        Self {
            word: self.word,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let cell = self.cell();
        if !cell.is_null() {
            unsafe { release(cell, 1) };
        }
    }
}

/// A non-owning `(pointer, tag, version)` witness.
///
/// Two witnesses are equal when address, tag, and version all match, which
/// is exactly the condition under which a compare-exchange against the slot
/// they were read from may succeed.
pub(crate) struct Versioned<T> {
    word: u64,
    _marker: PhantomData<*mut Counted<T>>,
}

impl<T> Clone for Versioned<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Versioned<T> {}

impl<T> PartialEq for Versioned<T> {
    fn eq(&self, other: &Self) -> bool {
        self.word == other.word
    }
}

impl<T> Eq for Versioned<T> {}

/// An atomic slot holding a tagged shared reference.
pub(crate) struct AtomicShared<T> {
    word: AtomicU64,
    _marker: PhantomData<*mut Counted<T>>,
}

unsafe impl<T: Send + Sync> Send for AtomicShared<T> {}
unsafe impl<T: Send + Sync> Sync for AtomicShared<T> {}

impl<T> AtomicShared<T> {
    /// An empty slot.
    pub(crate) fn null() -> Self {
        Self {
            word: AtomicU64::new(0),
            _marker: PhantomData,
        }
    }

    /// A slot initialised to `value`, charged as an install.
    pub(crate) fn new(value: Shared<T>) -> Self {
        let cell = value.cell();
        if !cell.is_null() {
            unsafe { (*cell).strong.fetch_add(CHARGE - 1, Ordering::Relaxed) };
        }
        let word = value.word;
        mem::forget(value);
        Self {
            word: AtomicU64::new(word),
            _marker: PhantomData,
        }
    }

    /// Claims one strong unit from the slot and returns the word observed
    /// at the claim. With `set_tag`, the stored tag bit is raised as part
    /// of the same CAS; the returned word carries the prior tag.
    fn claim(&self, set_tag: bool) -> u64 {
        let backoff = Backoff::new();
        let mut cur = self.word.load(Ordering::Acquire);
        loop {
            if word_addr(cur) == 0 && !set_tag {
                // Nothing to claim from an empty slot.
                return cur;
            }
            if word_loan(cur) == LOAN_CAP {
                // A refill is in flight; wait for the counter to reset.
                backoff.snooze();
                cur = self.word.load(Ordering::Acquire);
                continue;
            }
            let mut next = cur + LOAN_ONE;
            if set_tag {
                next |= TAG_BIT;
            }
            match self
                .word
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    if word_loan(next) == LOAN_CAP {
                        // Our claim saturated the counter, so the refill
                        // falls to us. The unit we just claimed keeps the
                        // cell alive across the top-up.
                        self.refill(next);
                    }
                    return cur;
                }
                Err(now) => {
                    cur = now;
                    backoff.spin();
                }
            }
        }
    }

    /// Tops the cell up with a fresh charge and resets the loan counter.
    fn refill(&self, saturated: u64) {
        let cell = word_addr(saturated) as *mut Counted<T>;
        if !cell.is_null() {
            unsafe { (*cell).strong.fetch_add(CHARGE - 1, Ordering::Relaxed) };
        }
        let reset = saturated & !LOAN_MASK;
        if self
            .word
            .compare_exchange(saturated, reset, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            // The pointer was replaced before the reset landed; the
            // replacement released the slot's remaining charge, so the
            // fresh units go straight back.
            if !cell.is_null() {
                unsafe { release(cell, CHARGE - 1) };
            }
        }
    }

    /// Loads a strong snapshot of the slot.
    pub(crate) fn load(&self) -> Shared<T> {
        Shared {
            word: self.claim(false) & IDENT_MASK,
            _marker: PhantomData,
        }
    }

    /// Loads a strong snapshot and raises the stored tag bit in one atomic
    /// step. The returned snapshot reports the tag as it was *before* the
    /// operation, which tells racing removers apart.
    pub(crate) fn load_and_tag(&self) -> Shared<T> {
        Shared {
            word: self.claim(true) & IDENT_MASK,
            _marker: PhantomData,
        }
    }

    /// Reads the current `(pointer, tag, version)` witness without taking
    /// ownership.
    pub(crate) fn load_versioned(&self) -> Versioned<T> {
        Versioned {
            word: self.word.load(Ordering::Acquire) & IDENT_MASK,
            _marker: PhantomData,
        }
    }

    /// Replaces the stored reference with `desired` iff the slot still
    /// matches `expected`. On failure `desired` is handed back unconsumed.
    pub(crate) fn compare_exchange(
        &self,
        expected: Versioned<T>,
        desired: Shared<T>,
    ) -> Result<(), Shared<T>> {
        let cell = desired.cell();
        if !cell.is_null() {
            // Charge up front so a loader can never drain the cell between
            // the install and the charge.
            unsafe { (*cell).strong.fetch_add(CHARGE - 1, Ordering::Relaxed) };
        }
        let d_bits = desired.word & (ADDR_MASK | TAG_BIT);
        let mut cur = self.word.load(Ordering::Relaxed);
        loop {
            if cur & IDENT_MASK != expected.word {
                if !cell.is_null() {
                    // Take the speculative charge back; `desired` still owns
                    // its own unit, so this cannot drop the count to zero.
                    unsafe { release(cell, CHARGE - 1) };
                }
                return Err(desired);
            }
            let next = d_bits | next_version(cur);
            match self
                .word
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    mem::forget(desired);
                    unsafe { uninstall::<T>(cur) };
                    return Ok(());
                }
                Err(now) => cur = now,
            }
        }
    }

    /// Unconditionally publishes `desired`, releasing whatever was stored.
    pub(crate) fn store(&self, desired: Shared<T>) {
        let cell = desired.cell();
        if !cell.is_null() {
            unsafe { (*cell).strong.fetch_add(CHARGE - 1, Ordering::Relaxed) };
        }
        let d_bits = desired.word & (ADDR_MASK | TAG_BIT);
        mem::forget(desired);
        let mut cur = self.word.load(Ordering::Relaxed);
        loop {
            let next = d_bits | next_version(cur);
            match self
                .word
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    unsafe { uninstall::<T>(cur) };
                    return;
                }
                Err(now) => cur = now,
            }
        }
    }

    /// Non-atomic variant of [`store`](Self::store).
    ///
    /// # Safety
    ///
    /// The slot must be unshared: no other thread may access it
    /// concurrently. Used on freshly allocated nodes before publication and
    /// during single-threaded teardown.
    pub(crate) unsafe fn unsafe_store(&self, desired: Shared<T>) {
        let cell = desired.cell();
        if !cell.is_null() {
            (*cell).strong.fetch_add(CHARGE - 1, Ordering::Relaxed);
        }
        let cur = self.word.load(Ordering::Relaxed);
        let next = (desired.word & (ADDR_MASK | TAG_BIT)) | next_version(cur);
        mem::forget(desired);
        self.word.store(next, Ordering::Relaxed);
        uninstall::<T>(cur);
    }
}

impl<T> Drop for AtomicShared<T> {
    fn drop(&mut self) {
        let cur = *self.word.get_mut();
        unsafe { uninstall::<T>(cur) };
    }
}
