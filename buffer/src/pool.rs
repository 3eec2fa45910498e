//! Block pool for efficient buffer reuse.
//!
//! Provides pooled, aligned, fixed-size blocks that back
//! [`NoncontiguousBuffer`](crate::NoncontiguousBuffer) segments. Pooling
//! amortizes both the allocation and the one-time zeroing of pages.
//!
//! # Thread Safety
//!
//! [`BlockPool`] is `Send + Sync` and can be safely shared across threads.
//! Acquire and release are lock-free operations using atomic counters and a
//! lock-free queue ([`crossbeam_queue::ArrayQueue`]).
//!
//! # Pool Lifecycle
//!
//! The pool uses reference counting internally. Blocks hold a weak reference
//! to the pool, so:
//! - If a block is released after the pool is dropped, its page is deallocated
//!   directly instead of being returned to the freelist.
//! - The pool can be dropped while blocks are still in use; those blocks
//!   remain valid and will be deallocated when they are dropped.
//!
//! # Exhaustion
//!
//! [`BlockPool::acquire`] never fails: when the freelist is exhausted it falls
//! back to an untracked aligned heap allocation that is deallocated (not
//! pooled) on drop. Use [`BlockPool::try_acquire`] to observe exhaustion
//! instead.

use crate::block::{AlignedBuffer, BlockMut};
use crossbeam_queue::ArrayQueue;
use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
};
use thiserror::Error;

/// Error returned when block acquisition fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The freelist has no blocks or slots left.
    #[error("pool exhausted")]
    Exhausted,
}

/// Returns the system page size.
///
/// On Unix systems, queries the actual page size via `sysconf`.
/// On other systems (Windows), defaults to 4KB.
#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf is safe to call.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096 // Safe fallback if sysconf fails
    } else {
        size as usize
    }
}

#[cfg(not(unix))]
fn page_size() -> usize {
    4096
}

/// Returns the cache line size for the current architecture.
///
/// Uses 128 bytes for x86_64 and aarch64 as a conservative estimate that
/// accounts for spatial prefetching. Uses 64 bytes for other architectures.
///
/// See: <https://github.com/crossbeam-rs/crossbeam/blob/983d56b6007ca4c22b56a665a7785f40f55c2a53/crossbeam-utils/src/cache_padded.rs>
const fn cache_line_size() -> usize {
    cfg_if::cfg_if! {
        if #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))] {
            128
        } else {
            64
        }
    }
}

fn nz(value: usize) -> NonZeroUsize {
    NonZeroUsize::new(value).expect("value must be non-zero")
}

/// Configuration for a block pool.
///
/// All blocks in a pool share one fixed size; callers that need both small
/// and large blocks create one pool per size.
#[derive(Debug, Clone)]
pub struct BlockPoolConfig {
    /// Block size. Must be >= alignment and a power of two.
    pub block_size: NonZeroUsize,
    /// Maximum number of pooled blocks.
    pub capacity: NonZeroUsize,
    /// Whether to pre-allocate all blocks on pool creation.
    pub prefill: bool,
    /// Block alignment. Must be a power of two.
    /// Use [`BlockPoolConfig::page_aligned`] for storage I/O; the default
    /// cache-line alignment suits network I/O.
    pub alignment: NonZeroUsize,
}

impl Default for BlockPoolConfig {
    fn default() -> Self {
        Self {
            block_size: nz(4096),
            capacity: nz(4096),
            prefill: false,
            alignment: nz(cache_line_size()),
        }
    }
}

impl BlockPoolConfig {
    /// Page-aligned preset for direct I/O: one-page blocks, 32 pooled, not
    /// prefilled.
    pub fn page_aligned() -> Self {
        let page = nz(page_size());
        Self {
            block_size: page,
            capacity: nz(32),
            prefill: false,
            alignment: page,
        }
    }

    /// Validates the configuration, panicking on invalid values.
    ///
    /// # Panics
    ///
    /// - `alignment` is not a power of two
    /// - `block_size` is not a power of two
    /// - `block_size < alignment`
    fn validate(&self) {
        assert!(
            self.alignment.is_power_of_two(),
            "alignment must be a power of two"
        );
        assert!(
            self.block_size.is_power_of_two(),
            "block_size must be a power of two"
        );
        assert!(
            self.block_size >= self.alignment,
            "block_size ({}) must be >= alignment ({})",
            self.block_size,
            self.alignment
        );
    }
}

/// Metrics for the block pool.
struct PoolMetrics {
    /// Number of blocks currently acquired (out of pool).
    acquired: Gauge,
    /// Number of blocks available in the pool.
    available: Gauge,
    /// Total number of successful pooled acquisitions.
    acquisitions_total: Counter,
    /// Total number of acquisitions that fell back to an untracked allocation.
    fallbacks_total: Counter,
}

impl PoolMetrics {
    fn new(registry: &mut Registry) -> Self {
        let metrics = Self {
            acquired: Gauge::default(),
            available: Gauge::default(),
            acquisitions_total: Counter::default(),
            fallbacks_total: Counter::default(),
        };

        registry.register(
            "block_pool_acquired",
            "Number of blocks currently acquired from the pool",
            metrics.acquired.clone(),
        );
        registry.register(
            "block_pool_available",
            "Number of blocks available in the pool",
            metrics.available.clone(),
        );
        registry.register(
            "block_pool_acquisitions_total",
            "Total number of successful pooled block acquisitions",
            metrics.acquisitions_total.clone(),
        );
        registry.register(
            "block_pool_fallbacks_total",
            "Total number of acquisitions served by untracked heap allocations",
            metrics.fallbacks_total.clone(),
        );

        metrics
    }
}

/// Internal state of the block pool.
///
/// The freelist stores `Option<AlignedBuffer>` where:
/// - `Some(page)` = a reusable page
/// - `None` = an available slot for creating a new page
pub(crate) struct BlockPoolInner {
    config: BlockPoolConfig,
    freelist: ArrayQueue<Option<AlignedBuffer>>,
    /// Number of pooled pages currently out of the pool.
    acquired: AtomicUsize,
    metrics: PoolMetrics,
}

impl BlockPoolInner {
    /// Try to take a page from the freelist.
    fn try_acquire_page(&self) -> Option<AlignedBuffer> {
        match self.freelist.pop() {
            Some(Some(page)) => {
                // Reuse existing page
                self.acquired.fetch_add(1, Ordering::Relaxed);
                self.metrics.acquisitions_total.inc();
                self.metrics.acquired.inc();
                self.metrics.available.dec();
                Some(page)
            }
            Some(None) => {
                // Create a new page (we have a slot)
                self.acquired.fetch_add(1, Ordering::Relaxed);
                self.metrics.acquisitions_total.inc();
                self.metrics.acquired.inc();
                Some(AlignedBuffer::new(
                    self.config.block_size.get(),
                    self.config.alignment.get(),
                ))
            }
            None => None,
        }
    }

    /// Return a page to the pool.
    pub(crate) fn release(&self, page: AlignedBuffer) {
        debug_assert_eq!(page.capacity(), self.config.block_size.get());
        self.acquired.fetch_sub(1, Ordering::Relaxed);
        self.metrics.acquired.dec();

        // Try to return to freelist
        match self.freelist.push(Some(page)) {
            Ok(()) => {
                self.metrics.available.inc();
            }
            Err(_page) => {
                // Freelist full, page is dropped and deallocated
            }
        }
    }
}

/// A pool of reusable, aligned, fixed-size blocks.
///
/// Blocks are automatically returned to the pool when the last reference to
/// them (the [`BlockMut`] or any [`Segment`](crate::Segment) frozen from it)
/// is dropped. The handle is cheap to clone and share.
#[derive(Clone)]
pub struct BlockPool {
    inner: Arc<BlockPoolInner>,
}

impl std::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockPool")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl BlockPool {
    /// Creates a new block pool with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn new(config: BlockPoolConfig, registry: &mut Registry) -> Self {
        config.validate();

        let metrics = PoolMetrics::new(registry);
        let freelist = ArrayQueue::new(config.capacity.get());
        for _ in 0..config.capacity.get() {
            let entry = if config.prefill {
                Some(AlignedBuffer::new(
                    config.block_size.get(),
                    config.alignment.get(),
                ))
            } else {
                None
            };
            let _ = freelist.push(entry);
        }

        // Update available metrics after prefill
        if config.prefill {
            metrics.available.set(freelist.len() as i64);
        }

        Self {
            inner: Arc::new(BlockPoolInner {
                config,
                freelist,
                acquired: AtomicUsize::new(0),
                metrics,
            }),
        }
    }

    /// Acquires an empty block.
    ///
    /// The returned block has `len() == 0` and `capacity() == block_size()`.
    /// Write through `BufMut` or [`BlockMut::spare_mut`].
    ///
    /// If the pool can provide a block, the returned block's page goes back to
    /// the pool when the block (or the segment frozen from it) is dropped.
    /// Otherwise this falls back to an untracked aligned heap allocation that
    /// is deallocated on drop.
    ///
    /// Use [`Self::try_acquire`] if exhaustion should be observable.
    pub fn acquire(&self) -> BlockMut {
        self.try_acquire().unwrap_or_else(|_| {
            self.inner.metrics.fallbacks_total.inc();
            let page = AlignedBuffer::new(
                self.inner.config.block_size.get(),
                self.inner.config.alignment.get(),
            );
            // Weak::new() means the page won't be returned to the pool on drop.
            BlockMut::new(page, Weak::new())
        })
    }

    /// Attempts to acquire a pooled block, returning an error on exhaustion.
    ///
    /// Unlike [`Self::acquire`], this method does not fall back to untracked
    /// allocation.
    pub fn try_acquire(&self) -> Result<BlockMut, PoolError> {
        let page = self
            .inner
            .try_acquire_page()
            .ok_or(PoolError::Exhausted)?;
        Ok(BlockMut::new(page, Arc::downgrade(&self.inner)))
    }

    /// Returns the fixed block size of this pool.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.inner.config.block_size.get()
    }

    /// Returns the number of pooled pages currently out of the pool.
    pub fn allocated(&self) -> usize {
        self.inner.acquired.load(Ordering::Relaxed)
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &BlockPoolConfig {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use std::{sync::mpsc, thread};

    fn test_pool(block_size: usize, capacity: usize) -> BlockPool {
        let config = BlockPoolConfig {
            block_size: nz(block_size),
            capacity: nz(capacity),
            prefill: false,
            alignment: nz(64),
        };
        BlockPool::new(config, &mut Registry::default())
    }

    #[test]
    fn test_acquire_and_release() {
        let pool = test_pool(4096, 2);

        let block = pool.try_acquire().unwrap();
        assert_eq!(block.capacity(), 4096);
        assert_eq!(pool.allocated(), 1);

        drop(block);
        assert_eq!(pool.allocated(), 0);

        // The released page is reused.
        let block = pool.try_acquire().unwrap();
        assert_eq!(block.capacity(), 4096);
        assert!(block.is_empty());
    }

    #[test]
    fn test_exhaustion() {
        let pool = test_pool(4096, 2);

        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert_eq!(pool.try_acquire().unwrap_err(), PoolError::Exhausted);

        drop(a);
        let c = pool.try_acquire().unwrap();
        assert_eq!(pool.try_acquire().unwrap_err(), PoolError::Exhausted);
        drop(b);
        drop(c);
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_acquire_falls_back_when_exhausted() {
        let pool = test_pool(4096, 1);

        let _held = pool.try_acquire().unwrap();
        // Freelist is empty but acquire still succeeds.
        let fallback = pool.acquire();
        assert_eq!(fallback.capacity(), 4096);
        assert!(!fallback.is_tracked());
        assert_eq!(pool.allocated(), 1); // fallback is untracked
        drop(fallback);
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_prefill() {
        let config = BlockPoolConfig {
            block_size: nz(4096),
            capacity: nz(4),
            prefill: true,
            alignment: nz(64),
        };
        let pool = BlockPool::new(config, &mut Registry::default());
        for _ in 0..4 {
            // Every acquisition hits a prefilled page.
            let block = pool.try_acquire().unwrap();
            drop(block);
        }
    }

    #[test]
    fn test_freeze_returns_page_on_last_drop() {
        let pool = test_pool(4096, 1);

        let mut block = pool.try_acquire().unwrap();
        block.put_slice(b"data");
        let segment = block.freeze();
        let clone = segment.clone();
        assert_eq!(pool.allocated(), 1);

        drop(segment);
        assert_eq!(pool.allocated(), 1); // clone still holds the page
        drop(clone);
        assert_eq!(pool.allocated(), 0);

        assert!(pool.try_acquire().is_ok());
    }

    #[test]
    fn test_pool_dropped_before_block() {
        let pool = test_pool(4096, 1);
        let mut block = pool.try_acquire().unwrap();
        block.put_slice(b"outlives the pool");
        drop(pool);

        // The block stays valid and deallocates cleanly.
        let segment = block.freeze();
        assert_eq!(segment.as_slice(), b"outlives the pool");
        drop(segment);
    }

    #[test]
    fn test_cross_thread_release() {
        let pool = test_pool(4096, 4);
        let (tx, rx) = mpsc::channel();

        let mut block = pool.try_acquire().unwrap();
        block.put_slice(b"sent across threads");
        tx.send(block.freeze()).unwrap();

        let handle = thread::spawn(move || {
            let segment = rx.recv().unwrap();
            assert_eq!(segment.as_slice(), b"sent across threads");
            // Dropped here, returning the page from another thread.
        });
        handle.join().unwrap();
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = test_pool(1024, 64);
        let mut handles = Vec::new();
        for t in 0..8 {
            let pool = pool.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let mut block = pool.acquire();
                    let byte = (t * 31 + i) as u8;
                    block.put_slice(&[byte; 16]);
                    let segment = block.freeze();
                    // No aliasing: the segment still holds exactly our bytes.
                    assert!(segment.as_slice().iter().all(|&b| b == byte));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_metrics_accounting() {
        let pool = test_pool(4096, 2);
        let metrics = &pool.inner.metrics;

        let a = pool.try_acquire().unwrap();
        let b = pool.acquire();
        let fallback = pool.acquire();
        assert_eq!(metrics.acquired.get(), 2);
        assert_eq!(metrics.acquisitions_total.get(), 2);
        assert_eq!(metrics.fallbacks_total.get(), 1);
        assert_eq!(metrics.available.get(), 0);

        drop(a);
        drop(b);
        drop(fallback); // untracked, does not touch the gauges
        assert_eq!(metrics.acquired.get(), 0);
        assert_eq!(metrics.available.get(), 2);

        let _c = pool.try_acquire().unwrap();
        assert_eq!(metrics.acquisitions_total.get(), 3);
        assert_eq!(metrics.available.get(), 1);
    }

    #[test]
    #[should_panic(expected = "block_size")]
    fn test_invalid_config() {
        let config = BlockPoolConfig {
            block_size: nz(64),
            capacity: nz(1),
            prefill: false,
            alignment: nz(128),
        };
        BlockPool::new(config, &mut Registry::default());
    }

    #[test]
    fn test_page_aligned_preset() {
        let config = BlockPoolConfig::page_aligned();
        config.validate();
        assert!(config.block_size.get() >= 4096);
    }
}
