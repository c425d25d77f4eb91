//! Byte-transport contract consumed by the channel.
//!
//! The channel moves ciphertext through two transport halves: one it
//! reads from and one it writes to. They may be two views of the same
//! socket or entirely separate objects. Would-block is reported as
//! `io::ErrorKind::WouldBlock`; a read of `Ok(0)` means end-of-stream.
//!
//! Methods take `&self` so that `close` and `is_open` remain callable
//! while another thread is blocked inside `read` or `write`;
//! implementations supply the interior mutability, as `&TcpStream`
//! already does for `io::Read`.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The readable half of a byte channel.
pub trait ReadTransport {
    /// Read bytes into `dst`.
    ///
    /// Returns `Ok(0)` on end-of-stream, or `WouldBlock` if the
    /// transport is non-blocking and has nothing available.
    fn read(&self, dst: &mut [u8]) -> io::Result<usize>;

    /// Close this half.
    fn close(&self) -> io::Result<()>;

    /// Whether this half is still open.
    fn is_open(&self) -> bool;
}

/// The writable half of a byte channel.
pub trait WriteTransport {
    /// Write bytes from `src`.
    ///
    /// Returns the number of bytes accepted, or `WouldBlock` if the
    /// transport is non-blocking and cannot accept any.
    fn write(&self, src: &[u8]) -> io::Result<usize>;

    /// Close this half.
    fn close(&self) -> io::Result<()>;

    /// Whether this half is still open.
    fn is_open(&self) -> bool;
}

impl<T: ReadTransport + ?Sized> ReadTransport for Arc<T> {
    fn read(&self, dst: &mut [u8]) -> io::Result<usize> {
        (**self).read(dst)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

impl<T: WriteTransport + ?Sized> WriteTransport for Arc<T> {
    fn write(&self, src: &[u8]) -> io::Result<usize> {
        (**self).write(src)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// TCP socket as a bidirectional transport.
///
/// Wraps a `TcpStream` and tracks open state, since the socket itself
/// does not expose one. Share one instance between the read and write
/// sides of a channel through an `Arc`:
///
/// ```ignore
/// let tcp = Arc::new(TcpTransport::new(stream));
/// let channel = ChannelBuilder::new(engine).build(tcp.clone(), tcp)?;
/// ```
pub struct TcpTransport {
    stream: TcpStream,
    open: AtomicBool,
}

impl TcpTransport {
    /// Wrap a connected stream.
    ///
    /// The stream's blocking mode is left as configured by the caller.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            open: AtomicBool::new(true),
        }
    }

    /// The underlying stream.
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    fn shutdown(&self) -> io::Result<()> {
        if self.open.swap(false, Ordering::AcqRel) {
            match self.stream.shutdown(Shutdown::Both) {
                // The peer may already have torn the socket down.
                Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
                other => other,
            }
        } else {
            Ok(())
        }
    }
}

impl ReadTransport for TcpTransport {
    fn read(&self, dst: &mut [u8]) -> io::Result<usize> {
        (&self.stream).read(dst)
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl WriteTransport for TcpTransport {
    fn write(&self, src: &[u8]) -> io::Result<usize> {
        (&self.stream).write(src)
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
