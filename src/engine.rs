//! TLS engine contract.
//!
//! The channel treats the TLS implementation as an opaque state machine
//! that converts between plaintext and ciphertext records and reports
//! what it needs next. Anything that can satisfy this trait plugs in:
//! the channel never looks inside records, validates certificates, or
//! negotiates parameters.

/// Largest plaintext payload a single record may carry.
///
/// One bit larger than the 2^14 the TLS specification allows; some
/// engines have been observed to produce records this large.
pub const MAX_DATA_SIZE: usize = 32768;

/// Upper bound on the size of a single encrypted record.
pub const MAX_RECORD_SIZE: usize = 5 // header
    + 256 // IV
    + MAX_DATA_SIZE // payload
    + 256 // padding
    + 20; // MAC

/// Outcome status of a single wrap or unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// The operation made progress.
    Ok,
    /// The source buffer does not hold a complete record yet.
    BufferUnderflow,
    /// The destination buffer cannot hold the output.
    BufferOverflow,
    /// The engine is closed in this direction.
    Closed,
}

/// What the engine needs next to advance its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Steady state; wrap and unwrap move application data.
    NotHandshaking,
    /// The engine has a handshake record to produce.
    NeedWrap,
    /// The engine needs a handshake record from the peer.
    NeedUnwrap,
    /// The engine has deferred CPU work pending.
    NeedTask,
    /// A handshake just completed.
    Finished,
}

/// Result of a single wrap or unwrap call.
#[derive(Debug, Clone, Copy)]
pub struct EngineResult {
    /// Outcome of the call.
    pub status: EngineStatus,
    /// Handshake state after the call.
    pub handshake_status: HandshakeStatus,
    /// Bytes consumed from the source buffer.
    pub bytes_consumed: usize,
    /// Bytes produced into the destination buffer.
    pub bytes_produced: usize,
}

/// Deferred CPU work handed out by the engine.
///
/// Run synchronously on the calling thread; the engine's handshake
/// status must move off [`HandshakeStatus::NeedTask`] once every
/// outstanding task has run.
pub type DelegatedTask = Box<dyn FnOnce() + Send>;

/// A fatal TLS protocol failure reported by the engine.
///
/// Covers everything from malformed records to alerts from the peer.
/// The channel treats any engine error as unrecoverable.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    /// Create an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An opaque TLS state machine.
///
/// `wrap` consumes plaintext from `src` and produces ciphertext records
/// into `dst`; `unwrap` does the reverse. Both report how many bytes
/// moved in each direction so the caller can advance its own cursors.
/// Neither performs I/O; feeding the transport is the channel's job.
pub trait TlsEngine {
    /// Opaque descriptor for the negotiated session.
    type Session;

    /// Encrypt plaintext from `src` into at most one record in `dst`.
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    /// Decrypt records from `src` into plaintext in `dst`.
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    /// Start a new handshake from this side.
    fn begin_handshake(&mut self) -> Result<(), EngineError>;

    /// Close the outbound direction; the engine will want to wrap a
    /// close-notify record afterwards.
    fn close_outbound(&mut self);

    /// Current handshake state.
    fn handshake_status(&self) -> HandshakeStatus;

    /// Take the next pending delegated task, if any.
    fn delegated_task(&mut self) -> Option<DelegatedTask>;

    /// The current session descriptor.
    fn session(&self) -> Self::Session;
}
