//! TLS channel adapter.
//!
//! [`TlsChannel`] wraps a pair of byte-transport halves and a
//! [`TlsEngine`], exposing the same byte-channel interface with the
//! payload transparently encrypted. The channel owns the orchestration
//! the engine does not: staging ciphertext and plaintext in record
//! buffers, driving handshakes (initial, renegotiated, or
//! peer-initiated), running delegated tasks, emitting close-notify,
//! and translating transport would-block conditions into retryable
//! signals.
//!
//! Readers and writers may run concurrently on one channel. The read
//! path owns the inbound buffers, the write path owns the outbound
//! buffer, and a handshake takes both. Lock acquisition order is
//! init, then read, then write, then engine; the engine lock is only
//! held across CPU-bound engine calls, never across transport waits.
//!
//! Buffer-state invariants are enforced with `assert!` rather than
//! `debug_assert!`: a violated invariant means the engine broke its
//! contract and the buffers can no longer be trusted, in any build.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::buffer::RecordBuffer;
use crate::engine::{EngineError, EngineStatus, HandshakeStatus, TlsEngine, MAX_RECORD_SIZE};
use crate::error::Error;
use crate::transport::{ReadTransport, WriteTransport};

/// Callback invoked once, with the engine's session descriptor, after
/// the initial handshake completes.
pub type SessionCallback<S> = Box<dyn Fn(&S) + Send + Sync>;

/// State owned by the read path.
struct ReadState {
    /// Ciphertext from the transport, not yet consumed by the engine.
    in_encrypted: RecordBuffer,
    /// Plaintext from the engine, not yet delivered to the caller.
    in_plain: RecordBuffer,
    /// The engine saw close-notify; the next read that finds no
    /// buffered plaintext closes the channel.
    tls_close_pending: bool,
}

/// State owned by the write path.
struct WriteState {
    /// Ciphertext from the engine, not yet drained to the transport.
    out_encrypted: RecordBuffer,
}

/// Conditions that abort a read-side pump loop.
enum Interrupt {
    /// The transport or the TLS layer reached clean end-of-stream.
    Eof,
    /// A real failure.
    Failed(Error),
}

impl From<Error> for Interrupt {
    fn from(e: Error) -> Self {
        Interrupt::Failed(e)
    }
}

/// A byte channel whose payload is encrypted by a pluggable TLS engine.
///
/// Construct through [`ChannelBuilder`](crate::ChannelBuilder), or
/// directly through [`TlsChannel::new`] to supply the inbound
/// ciphertext buffer yourself.
pub struct TlsChannel<R, W, E: TlsEngine> {
    reader: R,
    writer: W,
    engine: Mutex<E>,
    init_lock: Mutex<()>,
    read_state: Mutex<ReadState>,
    write_state: Mutex<WriteState>,
    session_callback: SessionCallback<E::Session>,
    initial_handshaked: AtomicBool,
    invalid: AtomicBool,
}

impl<R, W, E> TlsChannel<R, W, E>
where
    R: ReadTransport,
    W: WriteTransport,
    E: TlsEngine,
{
    /// Create a channel over the given transports and engine.
    ///
    /// `in_encrypted` stages ciphertext arriving from the transport and
    /// must be able to hold a maximum-size record; anything smaller is
    /// rejected before any I/O happens.
    pub fn new(
        reader: R,
        writer: W,
        engine: E,
        in_encrypted: RecordBuffer,
        session_callback: SessionCallback<E::Session>,
    ) -> Result<Self, Error> {
        if in_encrypted.capacity() < MAX_RECORD_SIZE {
            return Err(Error::BufferTooSmall {
                required: MAX_RECORD_SIZE,
                actual: in_encrypted.capacity(),
            });
        }
        Ok(Self {
            reader,
            writer,
            engine: Mutex::new(engine),
            init_lock: Mutex::new(()),
            read_state: Mutex::new(ReadState {
                in_encrypted,
                in_plain: RecordBuffer::new(crate::engine::MAX_DATA_SIZE),
                tls_close_pending: false,
            }),
            write_state: Mutex::new(WriteState {
                out_encrypted: RecordBuffer::new(MAX_RECORD_SIZE),
            }),
            session_callback,
            initial_handshaked: AtomicBool::new(false),
            invalid: AtomicBool::new(false),
        })
    }

    /// Read decrypted bytes into `dst`.
    ///
    /// Returns `Ok(n >= 1)` with `n` bytes copied into `dst`, `Ok(0)`
    /// if `dst` is empty or on clean end-of-stream, or
    /// [`Error::NeedsRead`] / [`Error::NeedsWrite`] when a non-blocking
    /// transport cannot make progress.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize, Error> {
        if dst.is_empty() {
            return Ok(0);
        }
        if self.invalid.load(Ordering::Acquire) {
            return Ok(0);
        }
        if !self.initial_handshaked.load(Ordering::Acquire) {
            self.handshake()?;
        }
        let mut read = self.read_state.lock();
        loop {
            let transferred = read.in_plain.drain_into(dst);
            if transferred > 0 {
                return Ok(transferred);
            }
            assert!(read.in_plain.is_empty());
            if read.tls_close_pending {
                self.close();
                return Ok(0);
            }
            let status = self.engine.lock().handshake_status();
            if status == HandshakeStatus::NeedUnwrap || status == HandshakeStatus::NeedWrap {
                // The peer wants a handshake. That needs both locks; we
                // already hold read, take write in order.
                let mut write = self.write_state.lock();
                self.drive_handshake(&mut read, &mut write, false)?;
            } else if let Some(n) = self.pump(&mut read, dst)? {
                return Ok(n);
            }
        }
    }

    /// Encrypt and send the bytes of `src`.
    ///
    /// On a blocking transport this consumes all of `src` and returns
    /// its length. On a non-blocking transport it returns the number of
    /// bytes consumed before the transport stalled, or
    /// [`Error::NeedsWrite`] if it stalled before consuming anything.
    pub fn write(&self, src: &[u8]) -> Result<usize, Error> {
        if src.is_empty() {
            return Ok(0);
        }
        if self.invalid.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        if !self.initial_handshaked.load(Ordering::Acquire) {
            self.handshake()?;
        }
        let mut write = self.write_state.lock();
        // A close may have won the race for the write lock.
        if self.invalid.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let mut consumed = 0;
        loop {
            if !write.out_encrypted.is_empty() {
                self.flush_outbound(&mut write)?;
                if !write.out_encrypted.is_empty() {
                    // The transport is non-blocking and stalled; report
                    // progress if there was any, otherwise signal.
                    if consumed > 0 {
                        return Ok(consumed);
                    }
                    return Err(Error::NeedsWrite);
                }
            }
            if consumed == src.len() {
                return Ok(consumed);
            }
            let mut engine = self.engine.lock();
            let result = engine
                .wrap(&src[consumed..], write.out_encrypted.unfilled())
                .map_err(|e| self.fail_tls(e))?;
            write.out_encrypted.add_filled(result.bytes_produced);
            trace!(
                ?result,
                status = ?engine.handshake_status(),
                remaining = src.len() - consumed,
                out_encrypted = write.out_encrypted.pending_len(),
                "engine wrap"
            );
            assert_ne!(engine.handshake_status(), HandshakeStatus::NeedTask);
            drop(engine);
            match result.status {
                EngineStatus::Ok => consumed += result.bytes_consumed,
                EngineStatus::Closed => {
                    self.invalid.store(true, Ordering::Release);
                    return Err(Error::Closed);
                }
                // A record always fits in a record-sized buffer, and a
                // wrap never waits for more source bytes.
                EngineStatus::BufferOverflow => {
                    unreachable!("engine overflowed a record-sized outbound buffer")
                }
                EngineStatus::BufferUnderflow => {
                    unreachable!("engine reported underflow on wrap")
                }
            }
        }
    }

    /// Drive the initial handshake. Idempotent; later calls return
    /// immediately once it has completed.
    pub fn handshake(&self) -> Result<(), Error> {
        let _init = self.init_lock.lock();
        if self.initial_handshaked.load(Ordering::Acquire) {
            return Ok(());
        }
        {
            let mut read = self.read_state.lock();
            let mut write = self.write_state.lock();
            self.drive_handshake(&mut read, &mut write, true)?;
        }
        let session = self.engine.lock().session();
        (self.session_callback)(&session);
        // Published only after the callback, so a failing callback
        // leaves the channel in its pre-handshake state.
        self.initial_handshaked.store(true, Ordering::Release);
        Ok(())
    }

    /// Force a new handshake on an established channel.
    pub fn renegotiate(&self) -> Result<(), Error> {
        if !self.initial_handshaked.load(Ordering::Acquire) {
            self.handshake()?;
        }
        let mut read = self.read_state.lock();
        let mut write = self.write_state.lock();
        self.drive_handshake(&mut read, &mut write, true)
    }

    /// Drive a handshake that the peer initiated.
    pub fn passive_handshake(&self) -> Result<(), Error> {
        if !self.initial_handshaked.load(Ordering::Acquire) {
            self.handshake()?;
        }
        let mut read = self.read_state.lock();
        let mut write = self.write_state.lock();
        self.drive_handshake(&mut read, &mut write, false)
    }

    /// Close the channel.
    ///
    /// Emits a best-effort close-notify record without awaiting the
    /// peer's response, then closes both transport halves. Idempotent.
    pub fn close(&self) {
        let mut write = self.write_state.lock();
        if !self.invalid.load(Ordering::Acquire) {
            let mut engine = self.engine.lock();
            engine.close_outbound();
            let mut notify_pending = false;
            if engine.handshake_status() == HandshakeStatus::NeedWrap {
                assert!(write.out_encrypted.is_empty());
                if let Ok(result) = engine.wrap(&[], write.out_encrypted.unfilled()) {
                    write.out_encrypted.add_filled(result.bytes_produced);
                    trace!(?result, "close-notify wrap");
                    assert_eq!(result.status, EngineStatus::Closed);
                    notify_pending = true;
                }
            }
            drop(engine);
            if notify_pending {
                // Best effort only; the peer's answer is not awaited and
                // a failed send does not matter.
                let _ = self.flush_outbound(&mut write);
            }
            self.invalid.store(true, Ordering::Release);
        }
        if let Err(e) = self.writer.close() {
            debug!(error = %e, "closing write transport");
        }
        if let Err(e) = self.reader.close() {
            debug!(error = %e, "closing read transport");
        }
    }

    /// Whether both transport halves report open.
    ///
    /// May still return true for a short window after [`close`]
    /// latches the channel, while the transports finish tearing down.
    ///
    /// [`close`]: TlsChannel::close
    pub fn is_open(&self) -> bool {
        self.writer.is_open() && self.reader.is_open()
    }

    /// The engine's current session descriptor.
    pub fn session(&self) -> E::Session {
        self.engine.lock().session()
    }

    /// Drive the engine over buffered ciphertext until plaintext is
    /// available, the peer requests a handshake, or the transport runs
    /// dry.
    ///
    /// Returns `Ok(Some(n))` when `n` bytes are ready for the caller
    /// (`n == 0` on clean end-of-stream), `Ok(None)` when the outer
    /// read loop should re-examine the channel state.
    fn pump(&self, read: &mut ReadState, dst: &mut [u8]) -> Result<Option<usize>, Error> {
        let result = (|| -> Result<Option<usize>, Interrupt> {
            self.unwrap_loop(read, HandshakeStatus::NotHandshaking)?;
            while read.in_plain.is_empty()
                && self.engine.lock().handshake_status() == HandshakeStatus::NotHandshaking
            {
                let n = self.read_from_network(read)?;
                if n == 0 {
                    // Non-blocking transport with nothing buffered:
                    // deliver whatever plaintext exists or signal.
                    let transferred = read.in_plain.drain_into(dst);
                    if transferred > 0 {
                        return Ok(Some(transferred));
                    }
                    return Err(Error::NeedsRead.into());
                }
                self.unwrap_loop(read, HandshakeStatus::NotHandshaking)?;
            }
            Ok(None)
        })();
        match result {
            Ok(outcome) => Ok(outcome),
            Err(Interrupt::Eof) => Ok(Some(0)),
            Err(Interrupt::Failed(e)) => Err(e),
        }
    }

    /// Feed buffered ciphertext through `engine.unwrap` until the
    /// status leaves `Ok` or the handshake status diverges from
    /// `loop_status`. Delegated tasks run inline. Consumed ciphertext
    /// is reclaimed the next time the inbound buffer's tail is filled.
    fn unwrap_loop(&self, read: &mut ReadState, loop_status: HandshakeStatus) -> Result<(), Interrupt> {
        assert!(read.in_plain.is_empty());
        let ReadState {
            in_encrypted,
            in_plain,
            tls_close_pending,
        } = read;
        let mut engine = self.engine.lock();
        loop {
            let result = engine
                .unwrap(in_encrypted.pending(), in_plain.unfilled())
                .map_err(|e| {
                    // Something bad arrived from the network; the
                    // stream cannot continue.
                    self.fail_tls(e)
                })?;
            in_encrypted.advance(result.bytes_consumed);
            in_plain.add_filled(result.bytes_produced);
            trace!(
                ?result,
                status = ?engine.handshake_status(),
                in_encrypted = in_encrypted.pending_len(),
                in_plain = in_plain.pending_len(),
                "engine unwrap"
            );
            if engine.handshake_status() == HandshakeStatus::NeedTask {
                while let Some(task) = engine.delegated_task() {
                    task();
                }
            }
            assert_ne!(engine.handshake_status(), HandshakeStatus::NeedTask);
            match result.status {
                EngineStatus::Ok | EngineStatus::BufferUnderflow => {}
                EngineStatus::BufferOverflow => {
                    // The engine checks overflow before underflow, so
                    // a full plaintext buffer means everything
                    // decrypted so far is already in it.
                    assert!(!in_plain.is_empty());
                }
                EngineStatus::Closed => {
                    *tls_close_pending = true;
                    if in_plain.is_empty() {
                        return Err(Interrupt::Eof);
                    }
                }
            }
            if result.status != EngineStatus::Ok || engine.handshake_status() != loop_status {
                return Ok(());
            }
        }
    }

    /// Pull ciphertext from the transport into the inbound buffer.
    ///
    /// Returns the byte count; zero means the transport is non-blocking
    /// and has nothing available. End-of-stream and transport failures
    /// latch the channel invalid.
    fn read_from_network(&self, read: &mut ReadState) -> Result<usize, Interrupt> {
        assert!(read.in_encrypted.room() > 0);
        trace!("reading from network");
        let n = match self.reader.read(read.in_encrypted.unfilled()) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
            Err(e) => {
                // After a failed read the buffers can be in any state.
                self.invalid.store(true, Ordering::Release);
                return Err(Error::Io(e).into());
            }
        };
        if n == 0 {
            self.invalid.store(true, Ordering::Release);
            return Err(Interrupt::Eof);
        }
        read.in_encrypted.add_filled(n);
        trace!(bytes = n, buffered = read.in_encrypted.pending_len(), "read from network");
        Ok(n)
    }

    /// Drain the outbound ciphertext buffer to the transport.
    ///
    /// Returns the number of bytes written; stops early (without error)
    /// when a non-blocking transport accepts nothing. Transport
    /// failures latch the channel invalid.
    fn flush_outbound(&self, write: &mut WriteState) -> Result<usize, Error> {
        let mut written = 0;
        while !write.out_encrypted.is_empty() {
            trace!(pending = write.out_encrypted.pending_len(), "writing to network");
            match self.writer.write(write.out_encrypted.pending()) {
                Ok(0) => break,
                Ok(n) => {
                    write.out_encrypted.advance(n);
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    // After a failed write the buffers can be in any state.
                    self.invalid.store(true, Ordering::Release);
                    return Err(e.into());
                }
            }
        }
        Ok(written)
    }

    /// Run a handshake to completion. Requires both the read and write
    /// locks; `active` additionally asks the engine to start a new
    /// handshake rather than serve one already in progress.
    fn drive_handshake(
        &self,
        read: &mut ReadState,
        write: &mut WriteState,
        active: bool,
    ) -> Result<(), Error> {
        assert!(read.in_plain.is_empty());
        // Ciphertext left over from a stalled write goes out first; the
        // engine produces one record per handshake wrap and it must fit.
        let pending = write.out_encrypted.pending_len();
        if pending > 0 {
            let flushed = self.flush_outbound(write)?;
            if flushed < pending {
                return Err(Error::NeedsWrite);
            }
        }
        if active {
            self.engine.lock().begin_handshake().map_err(|e| self.fail_tls(e))?;
            trace!("started active handshake");
        }
        self.handshake_loop(read, write)
    }

    /// The handshake state loop: wrap and flush when the engine needs
    /// to speak, pull and unwrap when it needs to listen, stop when it
    /// reports steady state.
    fn handshake_loop(&self, read: &mut ReadState, write: &mut WriteState) -> Result<(), Error> {
        assert!(read.in_plain.is_empty());
        let result = (|| -> Result<(), Interrupt> {
            loop {
                // Bound to a local so the engine guard is released
                // before the arms lock it again.
                let status = self.engine.lock().handshake_status();
                match status {
                    HandshakeStatus::NeedWrap => {
                        assert!(write.out_encrypted.is_empty());
                        {
                            let mut engine = self.engine.lock();
                            let result = engine
                                .wrap(&[], write.out_encrypted.unfilled())
                                .map_err(|e| self.fail_tls(e))?;
                            write.out_encrypted.add_filled(result.bytes_produced);
                            trace!(
                                ?result,
                                out_encrypted = write.out_encrypted.pending_len(),
                                "handshake wrap"
                            );
                            assert_eq!(result.status, EngineStatus::Ok);
                            assert_ne!(engine.handshake_status(), HandshakeStatus::NeedTask);
                        }
                        let pending = write.out_encrypted.pending_len();
                        let flushed = self.flush_outbound(write)?;
                        if flushed < pending {
                            return Err(Error::NeedsWrite.into());
                        }
                    }
                    HandshakeStatus::NeedUnwrap => {
                        assert!(read.in_plain.is_empty());
                        self.unwrap_loop(read, HandshakeStatus::NeedUnwrap)?;
                        while self.engine.lock().handshake_status() == HandshakeStatus::NeedUnwrap
                            && read.in_plain.is_empty()
                        {
                            let n = self.read_from_network(read)?;
                            if n == 0 {
                                return Err(Error::NeedsRead.into());
                            }
                            assert!(!read.in_encrypted.is_empty());
                            self.unwrap_loop(read, HandshakeStatus::NeedUnwrap)?;
                        }
                        // Application data may arrive interleaved with
                        // handshake records. Hand it back to the read
                        // path before continuing.
                        if !read.in_plain.is_empty() {
                            return Ok(());
                        }
                    }
                    HandshakeStatus::NotHandshaking
                    | HandshakeStatus::Finished
                    | HandshakeStatus::NeedTask => return Ok(()),
                }
            }
        })();
        match result {
            Ok(()) => Ok(()),
            // Would-block signals pass through untouched; they are
            // retry instructions, not failures.
            Err(Interrupt::Failed(e @ (Error::NeedsRead | Error::NeedsWrite))) => Err(e),
            Err(Interrupt::Eof) => Err(Error::Handshake {
                reason: "unexpected end of stream".into(),
                source: None,
            }),
            Err(Interrupt::Failed(e)) => Err(Error::handshake(e)),
        }
    }

    /// Latch the channel invalid and convert an engine failure.
    fn fail_tls(&self, e: EngineError) -> Error {
        self.invalid.store(true, Ordering::Release);
        Error::Tls(e)
    }
}

impl<R, W, E> io::Read for &TlsChannel<R, W, E>
where
    R: ReadTransport,
    W: WriteTransport,
    E: TlsEngine,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TlsChannel::read(*self, buf).map_err(io::Error::from)
    }
}

impl<R, W, E> io::Write for &TlsChannel<R, W, E>
where
    R: ReadTransport,
    W: WriteTransport,
    E: TlsEngine,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TlsChannel::write(*self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut write = self.write_state.lock();
        self.flush_outbound(&mut write).map_err(io::Error::from)?;
        if !write.out_encrypted.is_empty() {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        Ok(())
    }
}
