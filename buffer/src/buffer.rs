//! [`NoncontiguousBuffer`]: an ordered chain of [`Segment`]s acting as one
//! logical byte string.
//!
//! The chain supports O(1) length queries and front-consuming operations
//! (`skip`, `cut`) that move or narrow segment windows without copying bytes.
//! Only operations whose name ends in `_slow` are O(bytes).
//!
//! The buffer implements [`bytes::Buf`], including `chunks_vectored`, so it
//! plugs directly into vectored write paths.

use crate::{find_subslice, BlockPool, NoncontiguousBufferBuilder, Segment};
use bytes::Buf;
use std::{collections::VecDeque, io::IoSlice};

/// An ordered chain of segments forming one logical byte string.
///
/// Invariant: no stored segment is empty, and `len` is the sum of the stored
/// segment lengths.
#[derive(Clone, Default)]
pub struct NoncontiguousBuffer {
    segments: VecDeque<Segment>,
    len: usize,
}

impl std::fmt::Debug for NoncontiguousBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoncontiguousBuffer")
            .field("len", &self.len)
            .field("segments", &self.segments.len())
            .finish()
    }
}

impl NoncontiguousBuffer {
    /// Creates an empty buffer.
    #[inline]
    pub const fn new() -> Self {
        Self {
            segments: VecDeque::new(),
            len: 0,
        }
    }

    /// Copies `bytes` into pooled blocks, returning the resulting buffer.
    ///
    /// O(bytes). Zero-copy construction goes through `From`/`append` with an
    /// owned container, or through [`NoncontiguousBufferBuilder`].
    pub fn copy_from_slice_slow(pool: &BlockPool, bytes: &[u8]) -> Self {
        let mut builder = NoncontiguousBufferBuilder::new(pool);
        builder.append(bytes);
        builder.finish()
    }

    /// Returns the total number of bytes in the buffer.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the buffer holds no bytes.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of segments in the chain.
    #[inline]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Appends a segment to the back of the chain. Empty segments are
    /// dropped (releasing their storage) rather than stored.
    pub fn append(&mut self, segment: impl Into<Segment>) {
        let segment = segment.into();
        if segment.is_empty() {
            return;
        }
        self.len += segment.len();
        self.segments.push_back(segment);
    }

    /// Splices all of `other`'s segments onto the back of the chain.
    pub fn append_buffer(&mut self, mut other: NoncontiguousBuffer) {
        self.len += other.len;
        self.segments.append(&mut other.segments);
        other.len = 0;
    }

    /// Returns the first segment's bytes.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is empty.
    #[inline]
    pub fn first_contiguous(&self) -> &[u8] {
        self.segments
            .front()
            .expect("first_contiguous on an empty buffer")
            .as_slice()
    }

    /// Discards the first `n` bytes.
    ///
    /// Fully-consumed segments are dropped (their blocks are recycled once
    /// unreferenced); a straddling segment is advanced in place. No copy.
    ///
    /// # Panics
    ///
    /// Panics if `n > len()`.
    pub fn skip(&mut self, mut n: usize) {
        assert!(
            n <= self.len,
            "skipped {} bytes of a {}-byte buffer",
            n,
            self.len
        );
        self.len -= n;
        while n > 0 {
            let front = self
                .segments
                .front_mut()
                .expect("length accounting out of sync");
            if n < front.len() {
                front.skip(n);
                break;
            }
            n -= front.len();
            self.segments.pop_front();
        }
    }

    /// Removes and returns the first `n` bytes as a new buffer.
    ///
    /// Whole segments move over; a straddling segment is split into two
    /// windows sharing one block. No copy.
    ///
    /// # Panics
    ///
    /// Panics if `n > len()`.
    pub fn cut(&mut self, n: usize) -> NoncontiguousBuffer {
        assert!(
            n <= self.len,
            "cut {} bytes of a {}-byte buffer",
            n,
            self.len
        );
        let mut head = NoncontiguousBuffer::new();
        let mut left = n;
        while left > 0 {
            let front = self
                .segments
                .front_mut()
                .expect("length accounting out of sync");
            if left < front.len() {
                head.segments.push_back(front.split_to(left));
                left = 0;
            } else {
                left -= front.len();
                head.segments.push_back(
                    self.segments
                        .pop_front()
                        .expect("length accounting out of sync"),
                );
            }
        }
        head.len = n;
        self.len -= n;
        head
    }

    /// Drops every segment.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.len = 0;
    }

    /// Iterates over the segments in order.
    #[inline]
    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, Segment> {
        self.segments.iter()
    }

    /// Copies up to `max_bytes` from the front into a contiguous vector.
    /// O(bytes).
    pub fn flatten_slow(&self, max_bytes: usize) -> Vec<u8> {
        let total = self.len.min(max_bytes);
        let mut flat = Vec::with_capacity(total);
        for segment in &self.segments {
            let left = total - flat.len();
            if left == 0 {
                break;
            }
            let take = segment.len().min(left);
            flat.extend_from_slice(&segment.as_slice()[..take]);
        }
        flat
    }

    /// Copies bytes from the front up to and including the first occurrence
    /// of `delim`, capped at `max_bytes`. O(bytes).
    ///
    /// If `delim` does not occur, the whole buffer (capped at `max_bytes`) is
    /// returned. A delimiter found inside the first segment avoids walking
    /// the rest of the chain.
    ///
    /// # Panics
    ///
    /// Panics if `delim` is empty.
    pub fn flatten_slow_until(&self, delim: &[u8], max_bytes: usize) -> Vec<u8> {
        assert!(!delim.is_empty(), "empty delimiter");
        let Some(first) = self.segments.front() else {
            return Vec::new();
        };

        // Fast path: delimiter entirely inside the first segment.
        if let Some(pos) = find_subslice(first.as_slice(), delim) {
            let end = (pos + delim.len()).min(max_bytes);
            return first.as_slice()[..end].to_vec();
        }

        let mut flat = Vec::new();
        for segment in &self.segments {
            // Resume the search a bit before the old tail so a delimiter
            // straddling the segment boundary is still found.
            let searched = flat.len().saturating_sub(delim.len() - 1);
            flat.extend_from_slice(segment.as_slice());
            if let Some(pos) = find_subslice(&flat[searched..], delim) {
                flat.truncate(searched + pos + delim.len());
                break;
            }
            if flat.len() >= max_bytes {
                break;
            }
        }
        flat.truncate(max_bytes);
        flat
    }
}

impl Buf for NoncontiguousBuffer {
    #[inline]
    fn remaining(&self) -> usize {
        self.len
    }

    #[inline]
    fn chunk(&self) -> &[u8] {
        self.segments
            .front()
            .map(Segment::as_slice)
            .unwrap_or_default()
    }

    #[inline]
    fn advance(&mut self, cnt: usize) {
        self.skip(cnt);
    }

    fn chunks_vectored<'a>(&'a self, dst: &mut [IoSlice<'a>]) -> usize {
        let mut filled = 0;
        for segment in &self.segments {
            if filled == dst.len() {
                break;
            }
            dst[filled] = IoSlice::new(segment.as_slice());
            filled += 1;
        }
        filled
    }
}

impl IntoIterator for NoncontiguousBuffer {
    type Item = Segment;
    type IntoIter = std::collections::vec_deque::IntoIter<Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.into_iter()
    }
}

impl<'a> IntoIterator for &'a NoncontiguousBuffer {
    type Item = &'a Segment;
    type IntoIter = std::collections::vec_deque::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

impl Extend<Segment> for NoncontiguousBuffer {
    fn extend<I: IntoIterator<Item = Segment>>(&mut self, iter: I) {
        for segment in iter {
            self.append(segment);
        }
    }
}
