//! Pooled, reference-counted scatter-gather byte buffers.
//!
//! A [`NoncontiguousBuffer`] is an ordered chain of [`Segment`]s that behaves
//! like one logical byte string without ever being copied into one
//! allocation. Producers fill fixed-size blocks from a lock-free
//! [`BlockPool`] (or adopt existing containers zero-copy) and consumers peel
//! bytes off the front with O(1) bookkeeping, so a message can travel from
//! `readv` to a parser to a writer queue without compaction.
//!
//! # Components
//!
//! - [`BlockPool`] / [`BlockMut`]: aligned, fixed-size, recycled storage
//!   blocks with a heap fallback on exhaustion.
//! - [`Segment`]: a refcounted window over one contiguous run, backed by a
//!   pooled block, an adopted container, or caller-owned memory with a
//!   release callback.
//! - [`NoncontiguousBuffer`]: the segment chain, with zero-copy
//!   `skip`/`cut`/`append` and a [`bytes::Buf`] implementation.
//! - [`NoncontiguousBufferBuilder`]: incremental construction, including
//!   reserved ranges for back-patched length prefixes.
//! - [`view::ForwardView`] / [`view::RandomView`]: byte-level access for
//!   parsers.
//!
//! # Example
//!
//! ```
//! use braid_buffer::{BlockPool, BlockPoolConfig, NoncontiguousBufferBuilder};
//! use prometheus_client::registry::Registry;
//!
//! let pool = BlockPool::new(BlockPoolConfig::default(), &mut Registry::default());
//!
//! let mut builder = NoncontiguousBufferBuilder::new(&pool);
//! builder.append(b"hello ");
//! builder.append_segment("world");
//! let mut buffer = builder.finish();
//! assert_eq!(buffer.flatten_slow(usize::MAX), b"hello world");
//!
//! // Peel the front off without copying the rest.
//! let head = buffer.cut(6);
//! assert_eq!(head.flatten_slow(usize::MAX), b"hello ");
//! assert_eq!(buffer.flatten_slow(usize::MAX), b"world");
//! ```

mod block;
mod buffer;
mod builder;
mod pool;
mod segment;
pub mod view;

pub use block::BlockMut;
pub use buffer::NoncontiguousBuffer;
pub use builder::{NoncontiguousBufferBuilder, Reservation};
pub use pool::{BlockPool, BlockPoolConfig, PoolError};
pub use segment::Segment;

/// Returns the offset of the first occurrence of `needle` in `haystack`.
pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_subslice() {
        assert_eq!(find_subslice(b"abcdef", b"cd"), Some(2));
        assert_eq!(find_subslice(b"abcdef", b"abcdef"), Some(0));
        assert_eq!(find_subslice(b"abcdef", b"fg"), None);
        assert_eq!(find_subslice(b"abc", b"abcd"), None);
        assert_eq!(find_subslice(b"", b""), Some(0));
        assert_eq!(find_subslice(b"aaab", b"aab"), Some(1));
    }
}
