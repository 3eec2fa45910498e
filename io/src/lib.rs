//! Vectored socket read/write paths over pooled scatter-gather buffers.
//!
//! [`read_at_most`] scatters bytes from a non-blocking stream directly into
//! pooled blocks and appends them to a
//! [`NoncontiguousBuffer`](braid_buffer::NoncontiguousBuffer);
//! [`write_at_most`] gathers a buffer's segments into vectored writes. The
//! [`StreamIo`] trait is the seam between the transfer loops and the
//! underlying stream, with a blanket implementation for every
//! `io::Read + io::Write` type.
//!
//! # Example
//!
//! ```no_run
//! use braid_buffer::{BlockPool, BlockPoolConfig, NoncontiguousBuffer};
//! use braid_io::{read_at_most, ReadStatus};
//! use prometheus_client::registry::Registry;
//! use std::net::TcpStream;
//!
//! # fn main() -> std::io::Result<()> {
//! let pool = BlockPool::new(BlockPoolConfig::default(), &mut Registry::default());
//! let mut stream = TcpStream::connect("127.0.0.1:6379")?;
//! stream.set_nonblocking(true)?;
//!
//! let mut incoming = NoncontiguousBuffer::new();
//! match read_at_most(64 * 1024, &mut stream, &pool, &mut incoming)? {
//!     (ReadStatus::Drained, n) => println!("read {n} bytes, stream drained"),
//!     (ReadStatus::MaxBytesRead, n) => println!("read {n} bytes, more pending"),
//!     (ReadStatus::PeerClosing, _) => println!("peer closed"),
//! }
//! # Ok(())
//! # }
//! ```

mod stream_io;
mod transfer;

pub use stream_io::StreamIo;
pub use transfer::{read_at_most, write_at_most, ReadStatus, WriteStatus};
