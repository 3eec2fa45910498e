//! Bulk transfer between a [`StreamIo`] stream and noncontiguous buffers.
//!
//! [`read_at_most`] drives a vectored read loop that scatters incoming bytes
//! straight into pooled blocks; [`write_at_most`] gathers segments into a
//! vectored write. Neither copies payload bytes.
//!
//! # Drain heuristic
//!
//! Both paths assume readiness-driven (epoll-style) non-blocking streams: a
//! short count means the kernel had no more to give (or no more room), so the
//! loop reports [`ReadStatus::Drained`] / [`WriteStatus::Drained`] instead of
//! burning a syscall that would return `WouldBlock`.

use crate::StreamIo;
use braid_buffer::{BlockMut, BlockPool, NoncontiguousBuffer};
use std::io::{self, ErrorKind, IoSlice, IoSliceMut};
use tracing::trace;

/// Blocks scattered into a single vectored read, and segments gathered into a
/// single vectored write. Matches the kernel's `UIO_FASTIOV` fast path.
const MAX_SLICES_PER_CALL: usize = 8;

/// Why [`read_at_most`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The stream has no more bytes to give right now.
    Drained,
    /// `max_bytes` were read; the stream may have more.
    MaxBytesRead,
    /// The peer shut down its sending side.
    PeerClosing,
}

/// Why [`write_at_most`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The stream's send buffer has no more room right now.
    Drained,
    /// The source buffer was written in full.
    Flushed,
    /// `max_bytes` were written; the source buffer has more.
    MaxBytesWritten,
}

/// Reads up to `max_bytes` from `io` into `to`, scattering directly into
/// blocks acquired from `pool`.
///
/// Returns the stop reason and the number of bytes appended to `to`.
/// `Interrupted` reads are retried. On `Err`, bytes consumed by earlier
/// iterations remain appended to `to` and the error preserves the OS errno.
///
/// Each full block becomes one segment of `to`; a trailing partial block is
/// frozen at its filled length.
pub fn read_at_most<S: StreamIo + ?Sized>(
    max_bytes: usize,
    io: &mut S,
    pool: &BlockPool,
    to: &mut NoncontiguousBuffer,
) -> io::Result<(ReadStatus, usize)> {
    let mut cache: Vec<BlockMut> = Vec::with_capacity(MAX_SLICES_PER_CALL);
    let mut bytes_read = 0;

    while bytes_read < max_bytes {
        while cache.len() < MAX_SLICES_PER_CALL {
            cache.push(pool.acquire());
        }

        let budget = max_bytes - bytes_read;
        let (read, requested) = {
            // Scatter over the back of the cache; consumed blocks are popped
            // from there so untouched ones are reused next iteration.
            let mut slices = Vec::with_capacity(MAX_SLICES_PER_CALL);
            let mut requested = 0;
            for block in cache.iter_mut().rev() {
                if requested == budget {
                    break;
                }
                let want = block.spare_capacity().min(budget - requested);
                slices.push(IoSliceMut::new(&mut block.spare_mut()[..want]));
                requested += want;
            }
            match io.read_vectored(&mut slices) {
                Ok(read) => (read, requested),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return Ok((ReadStatus::Drained, bytes_read));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        if read == 0 {
            trace!("peer closed its sending side");
            return Ok((ReadStatus::PeerClosing, bytes_read));
        }
        bytes_read += read;

        // Freeze the filled blocks into `to`, back of the cache first.
        let mut left = read;
        while left > 0 {
            let mut block = cache.pop().expect("read larger than scattered capacity");
            let filled = left.min(block.spare_capacity());
            block.advance_filled(filled);
            to.append(block.freeze());
            left -= filled;
        }

        if read < requested {
            // The kernel gave us less than we asked for; asking again would
            // only earn a WouldBlock.
            let status = if bytes_read == max_bytes {
                ReadStatus::MaxBytesRead
            } else {
                trace!(bytes_read, "stream drained");
                ReadStatus::Drained
            };
            return Ok((status, bytes_read));
        }
    }
    Ok((ReadStatus::MaxBytesRead, bytes_read))
}

/// Writes up to `max_bytes` from `from` into `io`, gathering up to 8 segments
/// per vectored write.
///
/// Returns the stop reason and the number of bytes written; written bytes are
/// skipped off the front of `from`. `Interrupted` writes are retried. On
/// `Err`, bytes written by earlier iterations are already skipped and the
/// error preserves the OS errno. A write of `Ok(0)` with bytes pending is
/// reported as [`ErrorKind::WriteZero`].
pub fn write_at_most<S: StreamIo + ?Sized>(
    max_bytes: usize,
    io: &mut S,
    from: &mut NoncontiguousBuffer,
) -> io::Result<(WriteStatus, usize)> {
    let mut bytes_written = 0;

    loop {
        if from.is_empty() {
            return Ok((WriteStatus::Flushed, bytes_written));
        }
        if bytes_written == max_bytes {
            return Ok((WriteStatus::MaxBytesWritten, bytes_written));
        }

        let budget = max_bytes - bytes_written;
        let (result, requested) = {
            let mut slices = Vec::with_capacity(MAX_SLICES_PER_CALL);
            let mut requested = 0;
            for segment in from.iter() {
                if slices.len() == MAX_SLICES_PER_CALL || requested == budget {
                    break;
                }
                let take = segment.len().min(budget - requested);
                slices.push(IoSlice::new(&segment.as_slice()[..take]));
                requested += take;
            }
            (io.write_vectored(&slices), requested)
        };
        match result {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(written) => {
                from.skip(written);
                bytes_written += written;
                if written < requested {
                    trace!(bytes_written, "send buffer full");
                    return Ok((WriteStatus::Drained, bytes_written));
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Ok((WriteStatus::Drained, bytes_written));
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
