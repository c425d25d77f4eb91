//! tls-channel - non-blocking TLS framing adapter.
//!
//! This crate wraps a bidirectional byte transport and an externally
//! supplied TLS engine into a channel that reads and writes plaintext
//! while ciphertext records move over the wire. The engine does the
//! cryptography; the channel does everything between the engine and
//! the transport: record buffering, handshake driving (initial,
//! renegotiated, and peer-initiated), delegated-task execution,
//! half-close with best-effort close-notify, and correct signaling
//! when a non-blocking transport cannot make progress.
//!
//! # Features
//!
//! - **Pluggable engine**: any implementation of [`TlsEngine`] works;
//!   the channel never inspects record contents
//! - **Pluggable transports**: anything satisfying [`ReadTransport`] /
//!   [`WriteTransport`], blocking or non-blocking
//! - **Concurrent readers and writers**: one reader and one writer may
//!   operate on the same channel at the same time
//! - **Would-block signaling**: non-blocking stalls surface as
//!   [`Error::NeedsRead`] / [`Error::NeedsWrite`] retry signals rather
//!   than failures
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tls_channel::{ChannelBuilder, TcpTransport};
//!
//! let stream = std::net::TcpStream::connect("example.com:443")?;
//! let tcp = Arc::new(TcpTransport::new(stream));
//!
//! let channel = ChannelBuilder::new(engine)
//!     .session_callback(|session| { /* inspect the session */ })
//!     .build(tcp.clone(), tcp)?;
//!
//! channel.write(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")?;
//!
//! let mut buf = [0u8; 4096];
//! let n = channel.read(&mut buf)?;
//! ```
//!
//! # Non-blocking use
//!
//! With a non-blocking transport, `read` and `write` fail with
//! [`Error::NeedsRead`] or [`Error::NeedsWrite`] when they cannot make
//! progress. The variant names the direction to wait for, which is not
//! always the direction of the call: a `read` may need the transport
//! to become writable while a handshake record is pending.

mod buffer;
mod builder;
mod channel;
mod engine;
mod error;
mod transport;

// Re-exports
pub use buffer::RecordBuffer;
pub use builder::ChannelBuilder;
pub use channel::{SessionCallback, TlsChannel};
pub use engine::{
    DelegatedTask, EngineError, EngineResult, EngineStatus, HandshakeStatus, TlsEngine,
    MAX_DATA_SIZE, MAX_RECORD_SIZE,
};
pub use error::Error;
pub use transport::{ReadTransport, TcpTransport, WriteTransport};
