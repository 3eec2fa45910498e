//! Incremental construction of [`NoncontiguousBuffer`]s.
//!
//! The builder stages writable pool blocks and interleaves them with adopted
//! segments, so serializers can mix copied scalars, zero-copy payloads, and
//! back-patched length prefixes without reshuffling bytes.

use crate::{BlockMut, BlockPool, NoncontiguousBuffer, Segment};
use bytes::BufMut;

/// Segments smaller than this are copied into the current staged block (when
/// it has room) instead of being chained, trading one small memcpy for less
/// fragmentation on the read side.
const APPEND_VIA_COPY_THRESHOLD: usize = 128;

/// One ordered piece of the buffer under construction.
enum Piece {
    /// An adopted segment, chained as-is.
    Frozen(Segment),
    /// A pool block still open for writing.
    Staged(BlockMut),
}

/// A contiguous byte range handed out by [`NoncontiguousBufferBuilder::reserve`]
/// for later back-patching.
///
/// The range's contents are unspecified until
/// [`backfill`](NoncontiguousBufferBuilder::backfill) is called. A reservation
/// is only meaningful to the builder that issued it.
#[derive(Debug)]
pub struct Reservation {
    piece: usize,
    offset: usize,
    len: usize,
}

impl Reservation {
    /// Returns the reserved length in bytes.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always false: zero-byte reservations are rejected at creation.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        false
    }
}

/// Builds a [`NoncontiguousBuffer`] incrementally.
///
/// Bytes appended by copy land in staged blocks acquired from the pool;
/// segments and buffers are adopted zero-copy (small ones may be copied, see
/// [`Self::append_segment`]). [`Self::finish`] freezes the staged blocks and
/// yields the completed buffer; consuming `self` makes reuse a compile error.
pub struct NoncontiguousBufferBuilder {
    pool: BlockPool,
    pieces: Vec<Piece>,
    len: usize,
}

impl std::fmt::Debug for NoncontiguousBufferBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoncontiguousBufferBuilder")
            .field("len", &self.len)
            .field("pieces", &self.pieces.len())
            .finish()
    }
}

impl NoncontiguousBufferBuilder {
    /// Creates an empty builder drawing staged blocks from `pool`.
    pub fn new(pool: &BlockPool) -> Self {
        Self {
            pool: pool.clone(),
            pieces: Vec::new(),
            len: 0,
        }
    }

    /// Returns the total number of bytes staged so far.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing has been staged.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Spare capacity of the currently open staged block, if any.
    fn staged_spare(&self) -> usize {
        match self.pieces.last() {
            Some(Piece::Staged(block)) => block.spare_capacity(),
            _ => 0,
        }
    }

    /// Returns the open staged block, acquiring a fresh one if the last piece
    /// is adopted, full, or absent.
    fn open_block(&mut self) -> &mut BlockMut {
        let need_new = !matches!(
            self.pieces.last(),
            Some(Piece::Staged(block)) if block.spare_capacity() > 0
        );
        if need_new {
            self.pieces.push(Piece::Staged(self.pool.acquire()));
        }
        match self.pieces.last_mut() {
            Some(Piece::Staged(block)) => block,
            _ => unreachable!(),
        }
    }

    /// Copies `bytes` into staged blocks, splitting across fresh blocks as
    /// needed.
    pub fn append(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let block = self.open_block();
            let n = bytes.len().min(block.spare_capacity());
            block.put_slice(&bytes[..n]);
            bytes = &bytes[n..];
            self.len += n;
        }
    }

    /// Copies a single byte into the current staged block.
    pub fn append_u8(&mut self, byte: u8) {
        self.open_block().put_u8(byte);
        self.len += 1;
    }

    /// Adopts a segment zero-copy.
    ///
    /// Exception: a segment shorter than 128 bytes that fits in the current
    /// staged block's spare capacity is copied instead, and its storage is
    /// released immediately.
    pub fn append_segment(&mut self, segment: impl Into<Segment>) {
        let segment = segment.into();
        if segment.is_empty() {
            return;
        }
        if segment.len() < APPEND_VIA_COPY_THRESHOLD && self.staged_spare() >= segment.len() {
            self.append(segment.as_slice());
            return;
        }
        self.len += segment.len();
        self.pieces.push(Piece::Frozen(segment));
    }

    /// Adopts every segment of `buffer` zero-copy, with the same small-copy
    /// exception as [`Self::append_segment`] applied to the buffer as a whole.
    pub fn append_buffer(&mut self, buffer: NoncontiguousBuffer) {
        if buffer.len() < APPEND_VIA_COPY_THRESHOLD && self.staged_spare() >= buffer.len() {
            for segment in &buffer {
                self.append(segment.as_slice());
            }
            return;
        }
        for segment in buffer {
            self.len += segment.len();
            self.pieces.push(Piece::Frozen(segment));
        }
    }

    /// Reserves `n` contiguous bytes in a staged block for later
    /// back-patching via [`Self::backfill`].
    ///
    /// If the current staged block cannot hold `n` contiguous bytes, a fresh
    /// block is opened (the partially-filled one is frozen in place at
    /// [`Self::finish`]). The reserved range's contents are unspecified until
    /// backfilled.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0` or `n` exceeds the pool's block size.
    pub fn reserve(&mut self, n: usize) -> Reservation {
        assert!(n > 0, "reserved zero bytes");
        assert!(
            n <= self.pool.block_size(),
            "reserved {} bytes of at most {}",
            n,
            self.pool.block_size()
        );
        if self.staged_spare() < n {
            self.pieces.push(Piece::Staged(self.pool.acquire()));
        }
        let piece = self.pieces.len() - 1;
        let block = match self.pieces.last_mut() {
            Some(Piece::Staged(block)) => block,
            _ => unreachable!(),
        };
        let offset = block.len();
        block.advance_filled(n);
        self.len += n;
        Reservation {
            piece,
            offset,
            len: n,
        }
    }

    /// Writes `data` into a reserved range.
    ///
    /// May be called at any point before [`Self::finish`], in any order, and
    /// more than once per reservation.
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` differs from the reserved length, or if the
    /// reservation came from another builder.
    pub fn backfill(&mut self, reservation: &Reservation, data: &[u8]) {
        assert_eq!(
            data.len(),
            reservation.len,
            "backfilled {} bytes into a {}-byte reservation",
            data.len(),
            reservation.len
        );
        let block = match self.pieces.get_mut(reservation.piece) {
            Some(Piece::Staged(block)) => block,
            _ => panic!("reservation does not address a staged block"),
        };
        block.filled_mut()[reservation.offset..reservation.offset + reservation.len]
            .copy_from_slice(data);
    }

    /// Freezes all staged blocks and returns the completed buffer.
    pub fn finish(self) -> NoncontiguousBuffer {
        let mut buffer = NoncontiguousBuffer::new();
        for piece in self.pieces {
            match piece {
                Piece::Frozen(segment) => buffer.append(segment),
                Piece::Staged(block) => buffer.append(block.freeze()),
            }
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlockPoolConfig;
    use prometheus_client::registry::Registry;
    use rand::Rng;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn pool_with_block_size(block_size: usize) -> BlockPool {
        let config = BlockPoolConfig {
            block_size: block_size.try_into().unwrap(),
            capacity: 1024.try_into().unwrap(),
            prefill: false,
            alignment: 1.try_into().unwrap(),
        };
        BlockPool::new(config, &mut Registry::default())
    }

    fn pool() -> BlockPool {
        BlockPool::new(BlockPoolConfig::default(), &mut Registry::default())
    }

    #[test]
    fn test_append_and_finish() {
        let pool = pool();
        let mut builder = NoncontiguousBufferBuilder::new(&pool);
        assert!(builder.is_empty());
        builder.append(b"hello ");
        builder.append(b"world");
        builder.append_u8(b'!');
        assert_eq!(builder.len(), 12);

        let buffer = builder.finish();
        assert_eq!(buffer.len(), 12);
        assert_eq!(buffer.flatten_slow(usize::MAX), b"hello world!");
    }

    #[test]
    fn test_empty_finish() {
        let pool = pool();
        let buffer = NoncontiguousBufferBuilder::new(&pool).finish();
        assert!(buffer.is_empty());
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_content_equality_across_block_sizes() {
        let mut rng = rand::thread_rng();
        let payload: Vec<u8> = (0..20_000).map(|_| rng.gen()).collect();

        for block_size in [1, 16, 4096, 64 * 1024] {
            let pool = pool_with_block_size(block_size);
            let mut builder = NoncontiguousBufferBuilder::new(&pool);
            let mut start = 0;
            while start < payload.len() {
                let size = rng.gen_range(1..=(payload.len() - start).min(700));
                builder.append(&payload[start..start + size]);
                start += size;
            }
            assert_eq!(builder.len(), payload.len());
            let buffer = builder.finish();
            assert_eq!(buffer.flatten_slow(usize::MAX), payload);
        }
    }

    #[test]
    fn test_large_segment_adopted_zero_copy() {
        let pool = pool();
        let mut builder = NoncontiguousBufferBuilder::new(&pool);
        builder.append(b"head");
        let payload = vec![b'x'; 4 * 1024];
        builder.append_segment(payload.clone());
        builder.append(b"tail");

        let buffer = builder.finish();
        assert_eq!(buffer.len(), 8 + payload.len());
        // head block, adopted segment, tail block
        assert_eq!(buffer.segment_count(), 3);
        let expected: Vec<u8> = b"head"
            .iter()
            .chain(payload.iter())
            .chain(b"tail".iter())
            .copied()
            .collect();
        assert_eq!(buffer.flatten_slow(usize::MAX), expected);
    }

    #[test]
    fn test_small_segment_copied_into_staged_block() {
        let pool = pool();
        let mut builder = NoncontiguousBufferBuilder::new(&pool);
        builder.append(b"head ");
        builder.append_segment("small");
        builder.append(b" tail");

        let buffer = builder.finish();
        // Everything lands in the single staged block.
        assert_eq!(buffer.segment_count(), 1);
        assert_eq!(buffer.flatten_slow(usize::MAX), b"head small tail");
    }

    #[test]
    fn test_small_segment_without_staged_block_is_adopted() {
        let pool = pool();
        let mut builder = NoncontiguousBufferBuilder::new(&pool);
        // No staged block open, so even a small segment is chained as-is.
        builder.append_segment("tiny");
        let buffer = builder.finish();
        assert_eq!(buffer.segment_count(), 1);
        assert_eq!(buffer.flatten_slow(usize::MAX), b"tiny");
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_referencing_release_timing() {
        let released = Arc::new(AtomicUsize::new(0));
        let small = vec![1u8; 16];
        let large = vec![2u8; 4096];
        let pool = pool();

        let mut builder = NoncontiguousBufferBuilder::new(&pool);
        builder.append(b"open a staged block");

        // Small referencing segments are copied; release fires immediately.
        let segment = {
            let released = released.clone();
            // SAFETY: `small` outlives the segment and is never mutated.
            unsafe {
                Segment::referencing(small.as_ptr(), small.len(), move || {
                    released.fetch_add(1, Ordering::SeqCst);
                })
            }
        };
        builder.append_segment(segment);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        // Large ones are adopted; release waits for the last drop.
        let segment = {
            let released = released.clone();
            // SAFETY: `large` outlives the segment and is never mutated.
            unsafe {
                Segment::referencing(large.as_ptr(), large.len(), move || {
                    released.fetch_add(1, Ordering::SeqCst);
                })
            }
        };
        builder.append_segment(segment);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let buffer = builder.finish();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        drop(buffer);
        assert_eq!(released.load(Ordering::SeqCst), 2);
        drop((small, large));
    }

    #[test]
    fn test_append_buffer_zero_copy() {
        let pool = pool();
        let mut inner = NoncontiguousBuffer::new();
        inner.append(vec![b'a'; 200]);
        inner.append(vec![b'b'; 200]);

        let mut builder = NoncontiguousBufferBuilder::new(&pool);
        builder.append(b"prefix");
        builder.append_buffer(inner);
        let buffer = builder.finish();
        assert_eq!(buffer.segment_count(), 3);
        assert_eq!(buffer.len(), 406);
    }

    #[test]
    fn test_append_buffer_small_copied() {
        let pool = pool();
        let mut inner = NoncontiguousBuffer::new();
        inner.append("ab");
        inner.append("cd");

        let mut builder = NoncontiguousBufferBuilder::new(&pool);
        builder.append(b"1234");
        builder.append_buffer(inner);
        let buffer = builder.finish();
        assert_eq!(buffer.segment_count(), 1);
        assert_eq!(buffer.flatten_slow(usize::MAX), b"1234abcd");
    }

    #[test]
    fn test_reserve_backfill() {
        let pool = pool();
        let mut builder = NoncontiguousBufferBuilder::new(&pool);
        let header = builder.reserve(4);
        assert_eq!(header.len(), 4);
        builder.append(b"payload");
        let size = (builder.len() - 4) as u32;
        builder.backfill(&header, &size.to_be_bytes());

        let buffer = builder.finish();
        assert_eq!(buffer.len(), 11);
        let flat = buffer.flatten_slow(usize::MAX);
        assert_eq!(&flat[..4], &7u32.to_be_bytes());
        assert_eq!(&flat[4..], b"payload");
    }

    #[test]
    fn test_reserve_opens_fresh_block_when_fragmented() {
        let pool = pool_with_block_size(16);
        let mut builder = NoncontiguousBufferBuilder::new(&pool);
        builder.append(b"0123456789"); // 6 bytes spare
        let reservation = builder.reserve(8); // does not fit, new block
        builder.backfill(&reservation, b"ABCDEFGH");
        builder.append(b"end");

        let buffer = builder.finish();
        assert_eq!(buffer.segment_count(), 2);
        assert_eq!(buffer.flatten_slow(usize::MAX), b"0123456789ABCDEFGHend");
    }

    #[test]
    fn test_multiple_reservations_backfilled_out_of_order() {
        let pool = pool();
        let mut builder = NoncontiguousBufferBuilder::new(&pool);
        let first = builder.reserve(2);
        builder.append(b"--");
        let second = builder.reserve(2);
        builder.backfill(&second, b"zz");
        builder.backfill(&first, b"aa");
        // Overwriting a reservation is allowed.
        builder.backfill(&second, b"ZZ");

        assert_eq!(builder.finish().flatten_slow(usize::MAX), b"aa--ZZ");
    }

    #[test]
    #[should_panic(expected = "reserved")]
    fn test_reserve_over_block_size() {
        let pool = pool_with_block_size(16);
        let mut builder = NoncontiguousBufferBuilder::new(&pool);
        builder.reserve(17);
    }

    #[test]
    #[should_panic(expected = "backfilled")]
    fn test_backfill_length_mismatch() {
        let pool = pool();
        let mut builder = NoncontiguousBufferBuilder::new(&pool);
        let reservation = builder.reserve(4);
        builder.backfill(&reservation, b"toolong");
    }

    #[test]
    fn test_mixed_pieces_preserve_order() {
        let pool = pool();
        let mut builder = NoncontiguousBufferBuilder::new(&pool);
        builder.append_segment("abc");
        builder.append_segment("d");
        builder.append(b"efgh");
        builder.append(b"ijk");
        builder.append_u8(b'l');
        builder.append_u8(b'm');
        builder.append_buffer(NoncontiguousBuffer::copy_from_slice_slow(
            &pool,
            b"nopqrstuvwxyz",
        ));

        let buffer = builder.finish();
        let alphabet: Vec<u8> = (b'a'..=b'z').collect();
        assert_eq!(buffer.flatten_slow(usize::MAX), alphabet);
    }
}
