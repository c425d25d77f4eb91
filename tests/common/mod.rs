//! Shared test harness.
//!
//! Provides two things the end-to-end tests need: an in-memory duplex
//! pipe that behaves like a socket (blocking or non-blocking, with a
//! bounded buffer), and a mock TLS engine pair that speaks a toy
//! record protocol: a one-byte record type, a two-byte big-endian
//! length, and an XOR-masked payload. The handshake is one hello
//! flight from each side, with a delegated key-derivation task issued
//! on receipt of the peer's hello. Close is a close-notify record.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use tls_channel::{
    ChannelBuilder, DelegatedTask, EngineError, EngineResult, EngineStatus, HandshakeStatus,
    ReadTransport, TlsChannel, TlsEngine, WriteTransport, MAX_DATA_SIZE,
};

// ---------------------------------------------------------------------
// Pipe transport
// ---------------------------------------------------------------------

/// Bytes a single pipe direction will buffer before writers stall.
const PIPE_CAPACITY: usize = 256 * 1024;

struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
}

/// One direction of an in-memory byte stream.
struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
    writable: Condvar,
}

impl Pipe {
    fn new() -> Self {
        Self {
            state: Mutex::new(PipeState {
                buf: VecDeque::new(),
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    fn read(&self, dst: &mut [u8], nonblocking: bool) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        loop {
            if !state.buf.is_empty() {
                let n = dst.len().min(state.buf.len());
                for (slot, byte) in dst[..n].iter_mut().zip(state.buf.drain(..n)) {
                    *slot = byte;
                }
                self.writable.notify_all();
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            if nonblocking {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            state = self.readable.wait(state).unwrap();
        }
    }

    fn write(&self, src: &[u8], nonblocking: bool) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            let room = PIPE_CAPACITY - state.buf.len();
            if room > 0 {
                let n = src.len().min(room);
                state.buf.extend(&src[..n]);
                self.readable.notify_all();
                return Ok(n);
            }
            if nonblocking {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            state = self.writable.wait(state).unwrap();
        }
    }
}

/// One end of a duplex connection.
///
/// Implements both transport traits, so a single `Arc<Endpoint>` can
/// serve as the read and write half of a channel. Blocking mode can be
/// switched at runtime with [`Endpoint::set_nonblocking`].
pub struct Endpoint {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
    open: AtomicBool,
    nonblocking: AtomicBool,
}

impl Endpoint {
    /// Switch this end between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, on: bool) {
        self.nonblocking.store(on, Ordering::Release);
    }

    /// Half-close: stop sending, keep receiving. The peer sees
    /// end-of-stream once it drains what is already buffered.
    pub fn shutdown_outgoing(&self) {
        self.outgoing.close();
    }

    fn close_both(&self) {
        self.open.store(false, Ordering::Release);
        self.incoming.close();
        self.outgoing.close();
    }
}

/// Create a connected pair of endpoints.
pub fn duplex() -> (Arc<Endpoint>, Arc<Endpoint>) {
    let a_to_b = Arc::new(Pipe::new());
    let b_to_a = Arc::new(Pipe::new());
    let a = Arc::new(Endpoint {
        incoming: b_to_a.clone(),
        outgoing: a_to_b.clone(),
        open: AtomicBool::new(true),
        nonblocking: AtomicBool::new(false),
    });
    let b = Arc::new(Endpoint {
        incoming: a_to_b,
        outgoing: b_to_a,
        open: AtomicBool::new(true),
        nonblocking: AtomicBool::new(false),
    });
    (a, b)
}

impl ReadTransport for Endpoint {
    fn read(&self, dst: &mut [u8]) -> io::Result<usize> {
        self.incoming.read(dst, self.nonblocking.load(Ordering::Acquire))
    }

    fn close(&self) -> io::Result<()> {
        self.close_both();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl WriteTransport for Endpoint {
    fn write(&self, src: &[u8]) -> io::Result<usize> {
        self.outgoing.write(src, self.nonblocking.load(Ordering::Acquire))
    }

    fn close(&self) -> io::Result<()> {
        self.close_both();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------
// Mock engine
// ---------------------------------------------------------------------

const REC_CLOSE: u8 = 0x15;
const REC_HANDSHAKE: u8 = 0x16;
const REC_DATA: u8 = 0x17;
const HEADER: usize = 3;
const MASK: u8 = 0x5a;

const HELLO: &[u8] = b"hello";

/// Session descriptor handed out by [`MockEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSession {
    pub peer: &'static str,
    pub protocol: &'static str,
}

/// A toy TLS engine.
///
/// Records are `[type, len_hi, len_lo, payload...]` with data payloads
/// XOR-masked. The handshake exchanges one hello record per side; on
/// receiving the peer's hello the engine issues a delegated task that
/// stands in for key derivation, and the handshake is complete once
/// the task has run and our own hello is out. A handshake record that
/// arrives in steady state starts a peer-initiated renegotiation.
pub struct MockEngine {
    peer: &'static str,
    handshaking: bool,
    hello_sent: bool,
    hello_received: bool,
    task_pending: bool,
    task_handed: bool,
    task_done: Arc<AtomicBool>,
    outbound_closed: bool,
    close_sent: bool,
    inbound_closed: bool,
}

impl MockEngine {
    pub fn new(peer: &'static str) -> Self {
        Self {
            peer,
            handshaking: false,
            hello_sent: false,
            hello_received: false,
            task_pending: false,
            task_handed: false,
            task_done: Arc::new(AtomicBool::new(false)),
            outbound_closed: false,
            close_sent: false,
            inbound_closed: false,
        }
    }

    fn task_outstanding(&self) -> bool {
        self.task_pending && !self.task_done.load(Ordering::Acquire)
    }

    fn mid_handshake(&self) -> bool {
        self.handshaking && !(self.hello_sent && self.hello_received && !self.task_outstanding())
    }

    fn start_handshake(&mut self) {
        self.handshaking = true;
        self.hello_sent = false;
        self.hello_received = false;
        self.task_pending = false;
        self.task_handed = false;
        self.task_done = Arc::new(AtomicBool::new(false));
    }

    fn issue_task(&mut self) {
        self.task_pending = true;
        self.task_handed = false;
        self.task_done = Arc::new(AtomicBool::new(false));
    }

    fn result(&self, status: EngineStatus, consumed: usize, produced: usize) -> EngineResult {
        EngineResult {
            status,
            handshake_status: self.handshake_status(),
            bytes_consumed: consumed,
            bytes_produced: produced,
        }
    }

    fn encode_record(dst: &mut [u8], typ: u8, payload: &[u8], mask: bool) -> usize {
        let len = payload.len();
        dst[0] = typ;
        dst[1..3].copy_from_slice(&(len as u16).to_be_bytes());
        for (slot, &byte) in dst[HEADER..HEADER + len].iter_mut().zip(payload) {
            *slot = if mask { byte ^ MASK } else { byte };
        }
        HEADER + len
    }
}

impl TlsEngine for MockEngine {
    type Session = MockSession;

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        if self.outbound_closed {
            if self.close_sent {
                return Ok(self.result(EngineStatus::Closed, 0, 0));
            }
            let produced = Self::encode_record(dst, REC_CLOSE, &[], false);
            self.close_sent = true;
            return Ok(self.result(EngineStatus::Closed, 0, produced));
        }
        if self.mid_handshake() && !self.hello_sent && !self.task_outstanding() {
            let produced = Self::encode_record(dst, REC_HANDSHAKE, HELLO, false);
            self.hello_sent = true;
            return Ok(self.result(EngineStatus::Ok, 0, produced));
        }
        if src.is_empty() {
            return Ok(self.result(EngineStatus::Ok, 0, 0));
        }
        // Application data; legal even while a renegotiation is waiting
        // for the peer's hello.
        let room = dst.len().saturating_sub(HEADER);
        let n = src.len().min(MAX_DATA_SIZE).min(room);
        if n == 0 {
            return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
        }
        let produced = Self::encode_record(dst, REC_DATA, &src[..n], true);
        Ok(self.result(EngineStatus::Ok, n, produced))
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        if src.len() < HEADER {
            return Ok(self.result(EngineStatus::BufferUnderflow, 0, 0));
        }
        let typ = src[0];
        let len = u16::from_be_bytes([src[1], src[2]]) as usize;
        if src.len() < HEADER + len {
            return Ok(self.result(EngineStatus::BufferUnderflow, 0, 0));
        }
        match typ {
            REC_HANDSHAKE => {
                if &src[HEADER..HEADER + len] != HELLO {
                    return Err(EngineError::new("malformed hello record"));
                }
                if !self.mid_handshake() {
                    // Peer-initiated renegotiation.
                    self.start_handshake();
                }
                self.hello_received = true;
                self.issue_task();
                Ok(self.result(EngineStatus::Ok, HEADER + len, 0))
            }
            REC_DATA => {
                if dst.len() < len {
                    return Ok(self.result(EngineStatus::BufferOverflow, 0, 0));
                }
                for (slot, &byte) in dst[..len].iter_mut().zip(&src[HEADER..HEADER + len]) {
                    *slot = byte ^ MASK;
                }
                Ok(self.result(EngineStatus::Ok, HEADER + len, len))
            }
            REC_CLOSE => {
                self.inbound_closed = true;
                Ok(self.result(EngineStatus::Closed, HEADER + len, 0))
            }
            other => Err(EngineError::new(format!("unknown record type 0x{other:02x}"))),
        }
    }

    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        if self.outbound_closed {
            return Err(EngineError::new("engine is closed"));
        }
        if !self.mid_handshake() {
            self.start_handshake();
        }
        Ok(())
    }

    fn close_outbound(&mut self) {
        self.outbound_closed = true;
    }

    fn handshake_status(&self) -> HandshakeStatus {
        if self.outbound_closed && !self.close_sent {
            return HandshakeStatus::NeedWrap;
        }
        if self.mid_handshake() {
            if self.task_outstanding() {
                return HandshakeStatus::NeedTask;
            }
            if !self.hello_sent {
                return HandshakeStatus::NeedWrap;
            }
            return HandshakeStatus::NeedUnwrap;
        }
        HandshakeStatus::NotHandshaking
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        if self.task_outstanding() && !self.task_handed {
            self.task_handed = true;
            let done = self.task_done.clone();
            Some(Box::new(move || done.store(true, Ordering::Release)))
        } else {
            None
        }
    }

    fn session(&self) -> MockSession {
        MockSession {
            peer: self.peer,
            protocol: "TOY/1",
        }
    }
}

// ---------------------------------------------------------------------
// Channel pairs
// ---------------------------------------------------------------------

pub type TestChannel = TlsChannel<Arc<Endpoint>, Arc<Endpoint>, MockEngine>;

/// A connected client/server channel pair over a blocking pipe, plus
/// the raw endpoints for mode switching.
pub fn channel_pair() -> (Arc<TestChannel>, Arc<TestChannel>, Arc<Endpoint>, Arc<Endpoint>) {
    let (a, b) = duplex();
    let client = ChannelBuilder::new(MockEngine::new("client"))
        .build(a.clone(), a.clone())
        .unwrap();
    let server = ChannelBuilder::new(MockEngine::new("server"))
        .build(b.clone(), b.clone())
        .unwrap();
    (Arc::new(client), Arc::new(server), a, b)
}

/// Run the initial handshake from both ends concurrently.
pub fn handshake_pair(client: &Arc<TestChannel>, server: &Arc<TestChannel>) {
    let server = server.clone();
    let peer = std::thread::spawn(move || server.handshake().unwrap());
    client.handshake().unwrap();
    peer.join().unwrap();
}
