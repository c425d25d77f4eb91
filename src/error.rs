//! Error taxonomy for channel operations.

use std::io;

use crate::engine::EngineError;

/// Errors returned by channel operations.
///
/// [`Error::NeedsRead`] and [`Error::NeedsWrite`] are not failures:
/// they are would-block signals from a non-blocking transport. The
/// caller should wait for the transport to become ready in the
/// indicated direction and retry the same operation. Every other
/// variant leaves the channel invalid.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport had no bytes available and the operation cannot
    /// produce a result without more input. Retry once readable.
    #[error("transport needs a read retry")]
    NeedsRead,

    /// Pending ciphertext could not be drained to the transport.
    /// Retry once writable.
    #[error("transport needs a write retry")]
    NeedsWrite,

    /// The channel is closed.
    #[error("channel closed")]
    Closed,

    /// The engine reported a fatal TLS protocol failure.
    #[error("tls protocol error: {0}")]
    Tls(#[from] EngineError),

    /// A handshake could not be completed.
    #[error("handshake aborted: {reason}")]
    Handshake {
        /// Human-readable description of the failure.
        reason: String,
        /// The underlying failure, when one exists.
        #[source]
        source: Option<Box<Error>>,
    },

    /// The caller-supplied inbound ciphertext buffer cannot hold a
    /// maximum-size record.
    #[error("inbound encrypted buffer capacity must be at least {required} bytes (was {actual})")]
    BufferTooSmall {
        /// Minimum acceptable capacity.
        required: usize,
        /// Capacity that was supplied.
        actual: usize,
    },

    /// The transport failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns true for the would-block signals that mean "retry", as
    /// opposed to real failures.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::NeedsRead | Error::NeedsWrite)
    }

    /// Wrap a failure that interrupted a handshake, keeping it as the
    /// chained cause.
    pub(crate) fn handshake(cause: Error) -> Self {
        Error::Handshake {
            reason: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::NeedsRead | Error::NeedsWrite => io::Error::from(io::ErrorKind::WouldBlock),
            Error::Closed => io::Error::from(io::ErrorKind::NotConnected),
            Error::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}
