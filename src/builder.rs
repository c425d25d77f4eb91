//! Channel builder with fluent API.

use crate::buffer::RecordBuffer;
use crate::channel::{SessionCallback, TlsChannel};
use crate::engine::{TlsEngine, MAX_RECORD_SIZE};
use crate::error::Error;
use crate::transport::{ReadTransport, WriteTransport};

/// Builder for creating a [`TlsChannel`] with custom configuration.
///
/// # Example
///
/// ```ignore
/// use tls_channel::ChannelBuilder;
///
/// let channel = ChannelBuilder::new(engine)
///     .inbound_capacity(64 * 1024)
///     .session_callback(|session| println!("established: {session:?}"))
///     .build(reader, writer)?;
/// ```
pub struct ChannelBuilder<E: TlsEngine> {
    engine: E,
    inbound_capacity: usize,
    session_callback: Option<SessionCallback<E::Session>>,
}

impl<E: TlsEngine> ChannelBuilder<E> {
    /// Create a builder around the given engine, with default settings.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            inbound_capacity: MAX_RECORD_SIZE,
            session_callback: None,
        }
    }

    /// Set the capacity of the inbound ciphertext buffer.
    ///
    /// Must be at least [`MAX_RECORD_SIZE`]; `build` rejects anything
    /// smaller. Larger buffers let a single transport read pull in
    /// several records. Default: `MAX_RECORD_SIZE`.
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity;
        self
    }

    /// Set a callback to run once, with the session descriptor, after
    /// the initial handshake completes. Default: none.
    pub fn session_callback(
        mut self,
        callback: impl Fn(&E::Session) + Send + Sync + 'static,
    ) -> Self {
        self.session_callback = Some(Box::new(callback));
        self
    }

    /// Build the channel over the given transport halves.
    pub fn build<R, W>(self, reader: R, writer: W) -> Result<TlsChannel<R, W, E>, Error>
    where
        R: ReadTransport,
        W: WriteTransport,
    {
        TlsChannel::new(
            reader,
            writer,
            self.engine,
            RecordBuffer::new(self.inbound_capacity),
            self.session_callback.unwrap_or_else(|| Box::new(|_| {})),
        )
    }
}
