//! [`Segment`]: a reference-counted window over one contiguous run of bytes.
//!
//! Segments are the unit a [`NoncontiguousBuffer`](crate::NoncontiguousBuffer)
//! chains together. A segment can be backed by:
//!
//! - a pooled block frozen via [`BlockMut::freeze`](crate::BlockMut::freeze),
//! - an adopted owned container (`Vec<u8>`, `String`, `Bytes`, static slices)
//!   through the `From` conversions, or
//! - caller-owned memory with a release callback ([`Segment::referencing`]).
//!
//! All variants share `Bytes` reference counting: clones and splits are
//! refcount bumps, and the backing storage is released exactly once when the
//! last reference drops.

use bytes::{Buf, Bytes};

/// A cheaply-clonable window over one contiguous byte run.
///
/// The window can be narrowed in place ([`Self::skip`], [`Self::truncate`],
/// [`Self::split_to`]) without touching the underlying storage; it never grows
/// past the storage it was created over.
#[derive(Clone, Default)]
pub struct Segment(Bytes);

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment").field("len", &self.len()).finish()
    }
}

impl Segment {
    /// Creates an empty segment.
    #[inline]
    pub const fn new() -> Self {
        Self(Bytes::new())
    }

    /// Creates a segment over a static slice without copying.
    #[inline]
    pub const fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    /// Creates a segment referencing caller-owned memory.
    ///
    /// No copy is made. `release` is invoked exactly once when the last
    /// reference to the segment (including clones and splits) is dropped.
    ///
    /// Note that small referencing segments appended through
    /// [`NoncontiguousBufferBuilder`](crate::NoncontiguousBufferBuilder) may
    /// be copied into a staged block, in which case `release` fires as soon as
    /// the copy is made.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr..ptr + len`:
    /// - stays valid for reads and is not mutated until `release` is invoked,
    /// - may be read from any thread the segment or its clones travel to.
    pub unsafe fn referencing<F>(ptr: *const u8, len: usize, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Bytes::from_owner(ReferencingOwner {
            ptr,
            len,
            release: Some(release),
        }))
    }

    /// Returns the bytes in the window.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the window.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the window is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Advances the start of the window by `n` bytes. No copy.
    ///
    /// # Panics
    ///
    /// Panics if `n > len()`.
    #[inline]
    pub fn skip(&mut self, n: usize) {
        assert!(
            n <= self.len(),
            "skipped {} bytes of a {}-byte segment",
            n,
            self.len()
        );
        self.0.advance(n);
    }

    /// Shortens the window to at most `n` bytes. No copy.
    #[inline]
    pub fn truncate(&mut self, n: usize) {
        self.0.truncate(n);
    }

    /// Splits off and returns the first `n` bytes as a new segment sharing
    /// the same storage.
    ///
    /// # Panics
    ///
    /// Panics if `n > len()`.
    #[inline]
    pub fn split_to(&mut self, n: usize) -> Self {
        Self(self.0.split_to(n))
    }

    /// Consumes the segment, returning the underlying `Bytes`.
    #[inline]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl AsRef<[u8]> for Segment {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Segment {
    #[inline]
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Segment {
    #[inline]
    fn from(vec: Vec<u8>) -> Self {
        Self(Bytes::from(vec))
    }
}

impl From<String> for Segment {
    #[inline]
    fn from(string: String) -> Self {
        Self(Bytes::from(string))
    }
}

impl From<Box<[u8]>> for Segment {
    #[inline]
    fn from(boxed: Box<[u8]>) -> Self {
        Self(Bytes::from(boxed))
    }
}

impl From<&'static [u8]> for Segment {
    #[inline]
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for Segment {
    #[inline]
    fn from(string: &'static str) -> Self {
        Self(Bytes::from_static(string.as_bytes()))
    }
}

impl<const N: usize> From<&'static [u8; N]> for Segment {
    #[inline]
    fn from(bytes: &'static [u8; N]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}

impl Buf for Segment {
    #[inline]
    fn remaining(&self) -> usize {
        self.0.remaining()
    }

    #[inline]
    fn chunk(&self) -> &[u8] {
        self.0.chunk()
    }

    #[inline]
    fn advance(&mut self, cnt: usize) {
        self.0.advance(cnt);
    }

    #[inline]
    fn copy_to_bytes(&mut self, len: usize) -> Bytes {
        self.0.copy_to_bytes(len)
    }
}

/// Owner for referencing segments: borrows caller memory, runs the release
/// callback on last drop.
struct ReferencingOwner<F: FnOnce() + Send + 'static> {
    ptr: *const u8,
    len: usize,
    release: Option<F>,
}

// SAFETY: the Segment::referencing caller guarantees the region may be read
// from any thread; the callback itself is Send.
unsafe impl<F: FnOnce() + Send + 'static> Send for ReferencingOwner<F> {}

impl<F: FnOnce() + Send + 'static> AsRef<[u8]> for ReferencingOwner<F> {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: the Segment::referencing caller guarantees validity until
        // release is invoked, which only happens in Drop.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl<F: FnOnce() + Send + 'static> Drop for ReferencingOwner<F> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
