//! The [`StreamIo`] capability trait: the minimal vectored-I/O surface the
//! transfer paths need from a byte stream.

use std::io::{self, IoSlice, IoSliceMut, Read, Write};

/// A byte stream supporting vectored reads and writes.
///
/// Semantics follow POSIX `readv`/`writev`:
///
/// - `Ok(0)` from a read with non-empty buffers means orderly shutdown by the
///   peer.
/// - [`io::ErrorKind::WouldBlock`] means the stream is drained (reads) or its
///   send buffer is full (writes).
/// - Short counts are allowed in both directions.
///
/// Implemented for every `io::Read + io::Write` type (`TcpStream`,
/// `UnixStream`, ...). Streams used with
/// [`read_at_most`](crate::read_at_most) should be in non-blocking mode;
/// a blocking stream works but stalls the caller instead of reporting
/// [`Drained`](crate::ReadStatus::Drained).
pub trait StreamIo {
    /// Reads into the slices in order, returning the total bytes read.
    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize>;

    /// Writes from the slices in order, returning the total bytes written.
    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;
}

impl<T: Read + Write> StreamIo for T {
    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        Read::read_vectored(self, bufs)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        Write::write_vectored(self, bufs)
    }
}
