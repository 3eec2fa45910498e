//! Buffer blocks: the fixed-capacity storage units behind [`Segment`].
//!
//! A block is a single aligned heap allocation ([`AlignedBuffer`]). While a
//! block is exclusively owned it is writable through [`BlockMut`]; freezing it
//! produces an immutable, reference-counted [`Segment`]. The underlying page
//! is returned to its pool when the last reference drops.
//!
//! # Initialization
//!
//! Pages are allocated zeroed, and recycled pages retain whatever was written
//! to them previously. Every byte of a page is therefore always initialized,
//! which is what lets [`BlockMut::spare_mut`] hand out a plain `&mut [u8]`
//! over the unwritten tail (the vectored read path passes these slices to the
//! kernel directly, with no `MaybeUninit` plumbing).

use crate::{pool::BlockPoolInner, Segment};
use bytes::{buf::UninitSlice, BufMut, Bytes};
use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    mem::ManuallyDrop,
    ptr::NonNull,
    sync::Weak,
};

/// An aligned, zero-initialized page of memory.
///
/// Deallocates itself on drop using the stored layout.
pub(crate) struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: AlignedBuffer owns its memory and can be sent between threads.
unsafe impl Send for AlignedBuffer {}
// SAFETY: AlignedBuffer's memory is not shared (no interior mutability of pointer).
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocates a new zeroed page with the given capacity and alignment.
    ///
    /// # Panics
    ///
    /// Panics if allocation fails or the layout is invalid.
    pub(crate) fn new(capacity: usize, alignment: usize) -> Self {
        let layout = Layout::from_size_align(capacity, alignment).expect("invalid layout");

        // SAFETY: Layout is valid (non-zero size, power-of-two alignment).
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).expect("allocation failed");

        Self { ptr, layout }
    }

    /// Returns the capacity of the page.
    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// Returns a raw pointer to the page.
    #[inline]
    const fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// An exclusively-owned, writable buffer block.
///
/// Obtained from [`BlockPool::acquire`](crate::BlockPool::acquire). Bytes are
/// appended through [`bytes::BufMut`] (or [`Self::spare_mut`] +
/// [`Self::advance_filled`] for external writers such as `readv`), and the
/// filled prefix is frozen into an immutable [`Segment`] with [`Self::freeze`].
///
/// Capacity is fixed: writes beyond `spare_capacity()` panic per the `BufMut`
/// contract. On drop the page goes back to its pool, or is deallocated if the
/// pool is gone or the block came from a fallback allocation.
pub struct BlockMut {
    page: ManuallyDrop<AlignedBuffer>,
    /// Number of bytes written so far.
    len: usize,
    /// Reference to the pool.
    pool: Weak<BlockPoolInner>,
}

impl std::fmt::Debug for BlockMut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockMut")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl BlockMut {
    pub(crate) const fn new(page: AlignedBuffer, pool: Weak<BlockPoolInner>) -> Self {
        Self {
            page: ManuallyDrop::new(page),
            len: 0,
            pool,
        }
    }

    /// Returns `true` if this block is tracked by a pool.
    ///
    /// Tracked blocks return their page to the pool when dropped. Untracked
    /// blocks (from fallback allocations) are deallocated directly.
    #[inline]
    pub(crate) fn is_tracked(&self) -> bool {
        self.pool.strong_count() > 0
    }

    /// Returns the total capacity of the block.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.page.capacity()
    }

    /// Returns the number of bytes written so far.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing has been written yet.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of bytes that can still be written.
    #[inline]
    pub fn spare_capacity(&self) -> usize {
        self.page.capacity() - self.len
    }

    /// Returns the written prefix of the block.
    #[inline]
    pub fn filled(&self) -> &[u8] {
        // SAFETY: pages are fully initialized at allocation; len <= capacity.
        unsafe { std::slice::from_raw_parts(self.page.as_ptr(), self.len) }
    }

    /// Returns the written prefix of the block, mutably.
    #[inline]
    pub fn filled_mut(&mut self) -> &mut [u8] {
        // SAFETY: pages are fully initialized at allocation; len <= capacity,
        // and we have exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.page.as_ptr(), self.len) }
    }

    /// Returns the unwritten tail of the block.
    ///
    /// The slice is valid to read as well as write (pages are initialized),
    /// so it can be handed to `IoSliceMut` for vectored reads.
    #[inline]
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let capacity = self.page.capacity();
        // SAFETY: pages are fully initialized at allocation; len <= capacity,
        // and we have exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.page.as_ptr().add(self.len), capacity - self.len) }
    }

    /// Marks `cnt` additional bytes as written (e.g. after an external writer
    /// filled part of [`Self::spare_mut`]).
    ///
    /// # Panics
    ///
    /// Panics if `cnt > spare_capacity()`.
    #[inline]
    pub fn advance_filled(&mut self, cnt: usize) {
        assert!(
            cnt <= self.spare_capacity(),
            "advanced {} bytes past a spare capacity of {}",
            cnt,
            self.spare_capacity()
        );
        self.len += cnt;
    }

    /// Freezes the written prefix into an immutable [`Segment`].
    ///
    /// The page is returned to the pool once the segment (and every clone or
    /// split of it) has been dropped. Freezing an empty block releases the
    /// page immediately and returns an empty segment.
    pub fn freeze(self) -> Segment {
        if self.is_empty() {
            // Nothing to pin the page for; drop returns it to the pool.
            return Segment::default();
        }

        // Wrap self in ManuallyDrop first to prevent Drop from running
        // if any subsequent code panics.
        let mut me = ManuallyDrop::new(self);
        // SAFETY: me is wrapped in ManuallyDrop so its Drop impl won't run.
        // ManuallyDrop::take moves the inner page out, leaving the wrapper empty.
        let page = unsafe { ManuallyDrop::take(&mut me.page) };
        let len = me.len;
        let pool = std::mem::take(&mut me.pool);

        Segment::from(Bytes::from_owner(PageOwner::new(page, len, pool)))
    }
}

impl AsRef<[u8]> for BlockMut {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.filled()
    }
}

impl Drop for BlockMut {
    fn drop(&mut self) {
        // SAFETY: Drop is only called once. freeze() wraps self in ManuallyDrop
        // to prevent this Drop impl from running after ownership is transferred.
        let page = unsafe { ManuallyDrop::take(&mut self.page) };
        if let Some(pool) = self.pool.upgrade() {
            pool.release(page);
        }
        // else: page is dropped here, which deallocates it
    }
}

// SAFETY: BufMut implementation for BlockMut.
// - `remaining_mut()` reports bytes available for writing (capacity - len)
// - `chunk_mut()` returns the unwritten tail
// - `advance_mut()` advances len within bounds
unsafe impl BufMut for BlockMut {
    #[inline]
    fn remaining_mut(&self) -> usize {
        self.spare_capacity()
    }

    #[inline]
    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(
            cnt <= self.spare_capacity(),
            "cannot advance past end of block"
        );
        self.len += cnt;
    }

    #[inline]
    fn chunk_mut(&mut self) -> &mut UninitSlice {
        self.spare_mut().into()
    }
}

/// Owner for frozen block bytes that returns the page to the pool on drop.
struct PageOwner {
    page: ManuallyDrop<AlignedBuffer>,
    /// End offset of the data (exclusive).
    len: usize,
    pool: Weak<BlockPoolInner>,
}

impl PageOwner {
    const fn new(page: AlignedBuffer, len: usize, pool: Weak<BlockPoolInner>) -> Self {
        Self {
            page: ManuallyDrop::new(page),
            len,
            pool,
        }
    }
}

// Required for Bytes::from_owner
impl AsRef<[u8]> for PageOwner {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: pages are fully initialized at allocation; len <= capacity.
        unsafe { std::slice::from_raw_parts(self.page.as_ptr(), self.len) }
    }
}

impl Drop for PageOwner {
    fn drop(&mut self) {
        // SAFETY: Drop is only called once.
        let page = unsafe { ManuallyDrop::take(&mut self.page) };
        if let Some(pool) = self.pool.upgrade() {
            pool.release(page);
        }
        // else: page is dropped here, which deallocates it
    }
}
