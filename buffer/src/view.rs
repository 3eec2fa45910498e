//! Byte-level views over a [`NoncontiguousBuffer`].
//!
//! [`ForwardView`] walks the bytes lazily as an iterator. [`RandomView`]
//! builds a per-segment offset index at construction and offers positional
//! access plus a substring search that is correct across segment boundaries.
//! Both are O(bytes) tools for parsers; bulk consumption should use
//! `skip`/`cut` on the buffer itself.

use crate::{find_subslice, NoncontiguousBuffer};
use std::ops::Index;

/// A lazy byte iterator over a buffer.
#[derive(Clone)]
pub struct ForwardView<'a> {
    segments: std::collections::vec_deque::Iter<'a, crate::Segment>,
    current: &'a [u8],
    remaining: usize,
}

impl<'a> ForwardView<'a> {
    /// Creates a view positioned at the first byte of `buffer`.
    pub fn new(buffer: &'a NoncontiguousBuffer) -> Self {
        Self {
            segments: buffer.iter(),
            current: &[],
            remaining: buffer.len(),
        }
    }

    /// Returns the number of bytes not yet yielded.
    #[inline]
    pub const fn remaining(&self) -> usize {
        self.remaining
    }
}

impl Iterator for ForwardView<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        while self.current.is_empty() {
            self.current = self.segments.next()?.as_slice();
        }
        let (&byte, rest) = self.current.split_first()?;
        self.current = rest;
        self.remaining -= 1;
        Some(byte)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for ForwardView<'_> {}

/// A positionally-indexed view over a buffer.
///
/// Construction is O(segments); [`Self::get`] is O(log segments);
/// [`Self::find`] is a naive windowed search, O(bytes * needle) worst case,
/// with a memcmp fast path for candidates contained in a single segment.
pub struct RandomView<'a> {
    /// (starting offset, bytes) per segment, offsets strictly increasing.
    chunks: Vec<(usize, &'a [u8])>,
    len: usize,
}

impl<'a> RandomView<'a> {
    /// Creates a view over `buffer`.
    pub fn new(buffer: &'a NoncontiguousBuffer) -> Self {
        let mut chunks = Vec::with_capacity(buffer.segment_count());
        let mut offset = 0;
        for segment in buffer {
            chunks.push((offset, segment.as_slice()));
            offset += segment.len();
        }
        Self {
            chunks,
            len: buffer.len(),
        }
    }

    /// Returns the total number of bytes visible.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the view is empty.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the byte at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<u8> {
        if index >= self.len {
            return None;
        }
        let chunk = self.chunks.partition_point(|&(start, _)| start <= index) - 1;
        let (start, bytes) = self.chunks[chunk];
        Some(bytes[index - start])
    }

    /// Returns the offset of the first occurrence of `needle`, or `None`.
    ///
    /// An empty needle matches at offset 0.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        if needle.len() > self.len {
            return None;
        }
        let last_start = self.len - needle.len();
        for (index, &(base, chunk)) in self.chunks.iter().enumerate() {
            // Candidates contained entirely in this chunk: one memcmp scan.
            if chunk.len() >= needle.len() {
                if let Some(pos) = find_subslice(chunk, needle) {
                    return Some(base + pos);
                }
            }
            // Candidates starting in this chunk but spilling into the next:
            // the final needle.len() - 1 positions (or all of a short chunk).
            let spill_from = chunk.len().saturating_sub(needle.len() - 1);
            for rel in spill_from..chunk.len() {
                if base + rel > last_start {
                    return None;
                }
                if self.matches_across(index, rel, needle) {
                    return Some(base + rel);
                }
            }
        }
        None
    }

    /// Compares `needle` against the bytes starting at offset `rel` of chunk
    /// `index`, continuing into subsequent chunks.
    fn matches_across(&self, mut index: usize, mut rel: usize, mut needle: &[u8]) -> bool {
        loop {
            let chunk = &self.chunks[index].1[rel..];
            let take = chunk.len().min(needle.len());
            if chunk[..take] != needle[..take] {
                return false;
            }
            needle = &needle[take..];
            if needle.is_empty() {
                return true;
            }
            index += 1;
            rel = 0;
            if index == self.chunks.len() {
                return false;
            }
        }
    }
}

impl Index<usize> for RandomView<'_> {
    type Output = u8;

    fn index(&self, index: usize) -> &u8 {
        let chunk = self.chunks.partition_point(|&(start, _)| start <= index) - 1;
        let (start, bytes) = self.chunks[chunk];
        &bytes[index - start]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockPool, BlockPoolConfig, NoncontiguousBufferBuilder};
    use prometheus_client::registry::Registry;
    use rand::Rng;

    fn pool() -> BlockPool {
        BlockPool::new(BlockPoolConfig::default(), &mut Registry::default())
    }

    /// Builds "abcdefghijklmnopqrstuvwxyz" from a deliberate mix of adopted,
    /// copied, and pooled pieces.
    fn a_to_z(pool: &BlockPool) -> NoncontiguousBuffer {
        let mut builder = NoncontiguousBufferBuilder::new(pool);
        builder.append_segment("abc");
        builder.append_segment("d");
        builder.append(b"efgh");
        builder.append(b"ijk");
        builder.append_u8(b'l');
        builder.append_u8(b'm');
        builder.append_buffer(NoncontiguousBuffer::copy_from_slice_slow(
            pool,
            b"nopqrstuvwxyz",
        ));
        builder.finish()
    }

    #[test]
    fn test_forward_view_walks_in_order() {
        let pool = pool();
        let buffer = a_to_z(&pool);
        let view = ForwardView::new(&buffer);
        assert_eq!(view.remaining(), buffer.len());

        let walked: Vec<u8> = view.collect();
        let alphabet: Vec<u8> = (b'a'..=b'z').collect();
        assert_eq!(walked, alphabet);
    }

    #[test]
    fn test_forward_view_clone_is_independent() {
        let pool = pool();
        let buffer = a_to_z(&pool);
        let mut view = ForwardView::new(&buffer);
        assert_eq!(view.next(), Some(b'a'));

        let fork = view.clone();
        assert_eq!(view.next(), Some(b'b'));
        assert_eq!(fork.clone().next(), Some(b'b'));
        assert_eq!(fork.count(), 25);
    }

    #[test]
    fn test_forward_view_empty() {
        let buffer = NoncontiguousBuffer::new();
        let mut view = ForwardView::new(&buffer);
        assert_eq!(view.remaining(), 0);
        assert_eq!(view.next(), None);
    }

    #[test]
    fn test_random_view_positional_access() {
        let pool = pool();
        let buffer = a_to_z(&pool);
        let view = RandomView::new(&buffer);
        assert_eq!(view.len(), 26);
        assert!(!view.is_empty());

        for i in 0..26 {
            assert_eq!(view.get(i), Some(b'a' + i as u8));
            assert_eq!(view[i], b'a' + i as u8);
        }
        assert_eq!(view.get(26), None);
    }

    #[test]
    fn test_find_within_and_across_segments() {
        let pool = pool();
        let buffer = a_to_z(&pool);
        let view = RandomView::new(&buffer);

        assert_eq!(view.find(b"abc"), Some(0));
        // Straddles adopted, copied, and pooled pieces.
        assert_eq!(view.find(b"hijklmn"), Some(7));
        assert_eq!(view.find(b"z"), Some(25));
        assert_eq!(view.find(b"za"), None);
        assert_eq!(view.find(b""), Some(0));
    }

    #[test]
    fn test_find_on_empty_view() {
        let buffer = NoncontiguousBuffer::new();
        let view = RandomView::new(&buffer);
        assert_eq!(view.find(b"a"), None);
        assert_eq!(view.find(b""), Some(0));
        assert_eq!(view.get(0), None);
    }

    #[test]
    fn test_find_in_large_repetitive_buffer() {
        let pool = pool();
        let haystack = vec![b'a'; 10 * 1024 * 1024];
        let buffer = NoncontiguousBuffer::copy_from_slice_slow(&pool, &haystack);

        let view = RandomView::new(&buffer);
        assert_eq!(view.find(&[b'a'; 27]), Some(0));

        let mut absent = vec![b'a'; 21];
        absent.push(b'b');
        assert_eq!(view.find(&absent), None);
    }

    #[test]
    fn test_find_with_random_segmentation() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let value: String = (0..100).map(|i| i.to_string()).collect::<Vec<_>>().join("");
            let haystack = format!("asdfdsf{value}XXXADFFDAF");

            let mut buffer = NoncontiguousBuffer::new();
            let bytes = haystack.into_bytes();
            let mut start = 0;
            while start < bytes.len() {
                let size = rng.gen_range(1..=bytes.len() - start);
                buffer.append(bytes[start..start + size].to_vec());
                start += size;
            }

            let view = RandomView::new(&buffer);
            assert_eq!(view.find(value.as_bytes()), Some(7));
        }
    }

    #[test]
    fn test_find_needle_longer_than_buffer() {
        let mut buffer = NoncontiguousBuffer::new();
        buffer.append("ab");
        let view = RandomView::new(&buffer);
        assert_eq!(view.find(b"abc"), None);
    }
}
