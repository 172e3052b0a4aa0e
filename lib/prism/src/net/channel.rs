use crate::net::buffer::Buffer;
use crate::net::codec::{self, HEADER_SIZE};
use crate::net::handshake::{rejection_packet, AuthConfig, FailureCause, Handshake};
use crate::net::packet::{self, Packet, PacketType};
use crate::net::queue::{MailItem, Mailbox};
use crate::net::secure::{Role, RxCrypto, TxCrypto};
use crate::net::{CryptoError, NetError, NetResult, ProtocolError};
use crate::{ClientId, MAX_PACKET_BODY};
use byteorder::{BigEndian, ByteOrder};
use crossbeam_channel as channel;
use parking_lot::Mutex;
use quartz::logging::{self, Logger};
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Granularity of the reader's blocking-read tick and of close-flag polling.
const TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// No inbound traffic for this long closes the session.
    pub read_timeout: Duration,
    /// Outbound idleness before a PING is emitted.
    pub ping_interval: Duration,
    /// Wall-clock budget for the whole handshake.
    pub handshake_budget: Duration,
    pub outbound_capacity: usize,
    pub inbound_capacity: usize,
    /// Record-layer toggle; disabled only by `--no-encrypt`.
    pub encrypt: bool,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            read_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(5),
            handshake_budget: Duration::from_secs(10),
            outbound_capacity: 64,
            inbound_capacity: 256,
            encrypt: true,
        }
    }
}

impl SessionConfig {
    pub fn from_network(network: &quartz::config::NetworkConfig, encrypt: bool) -> SessionConfig {
        SessionConfig {
            read_timeout: Duration::from_secs(network.read_timeout_secs),
            ping_interval: Duration::from_secs(network.ping_interval_secs),
            handshake_budget: Duration::from_secs(network.handshake_timeout_secs),
            encrypt,
            ..SessionConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called locally.
    Requested,
    /// The peer closed the stream.
    PeerClosed,
    /// The peer announced departure with `BYE`.
    ByeReceived,
    Timeout,
    HandshakeFailed(FailureCause),
    Protocol(ProtocolError),
    Crypto(CryptoError),
    Io(io::ErrorKind),
}

impl CloseReason {
    pub(crate) fn from_error(err: NetError) -> CloseReason {
        match err {
            NetError::Protocol(kind) => CloseReason::Protocol(kind),
            NetError::Crypto(kind) => CloseReason::Crypto(kind),
            NetError::Timeout => CloseReason::Timeout,
            NetError::Io(kind) => CloseReason::Io(kind),
            _ => CloseReason::Requested,
        }
    }
}

/// What the handshake learned about the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub identity: Option<[u8; 32]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake completed; media may now flow.
    Ready(PeerInfo),
    /// A decrypted application packet, stamped with its original source.
    Packet { source: ClientId, packet: Packet },
    /// Terminal event; nothing follows it.
    Closed(CloseReason),
}

impl MailItem for SessionEvent {
    #[inline]
    fn droppable(&self) -> bool {
        match self {
            SessionEvent::Packet { packet, .. } => packet.ptype.is_media(),
            _ => false,
        }
    }
}

/// Writer-side signal that the record layer is up.
struct ReadySignal {
    tx: Option<TxCrypto>,
}

struct Shared {
    outbound: Mailbox<(ClientId, Packet)>,
    inbound: Mailbox<SessionEvent>,
    closing: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
}

impl Shared {
    /// First close reason wins; later ones describe follow-on failures.
    fn request_close(&self, reason: CloseReason) {
        let mut slot = self.close_reason.lock();
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.closing.store(true, Ordering::Release);
    }
}

/// A connection session: one socket, one crypto context, a reader thread and a writer
/// thread joined by bounded mailboxes. The hub (or the client pipeline) talks to it
/// exclusively through `send`/`recv`/`close` and the cloneable `SessionSender`.
pub struct Session {
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Session {
    pub fn connect(
        addr: &SocketAddr,
        auth: AuthConfig,
        config: SessionConfig,
        log: &Logger,
    ) -> NetResult<Session> {
        let stream = TcpStream::connect(addr)?;
        Session::spawn(stream, Role::Client, auth, config, log)
    }

    pub fn accept(
        stream: TcpStream,
        auth: AuthConfig,
        config: SessionConfig,
        log: &Logger,
    ) -> NetResult<Session> {
        Session::spawn(stream, Role::Server, auth, config, log)
    }

    fn spawn(
        stream: TcpStream,
        role: Role,
        auth: AuthConfig,
        config: SessionConfig,
        log: &Logger,
    ) -> NetResult<Session> {
        stream.set_nodelay(true).ok();

        let reader_stream = stream.try_clone()?;
        let writer_stream = stream;

        let shared = Arc::new(Shared {
            outbound: Mailbox::new(config.outbound_capacity),
            inbound: Mailbox::new(config.inbound_capacity),
            closing: AtomicBool::new(false),
            close_reason: Mutex::new(None),
        });

        let (ready_tx, ready_rx) = channel::bounded::<ReadySignal>(1);

        let reader_log = log.new(logging::o!("task" => "reader"));
        let writer_log = log.new(logging::o!("task" => "writer"));

        let reader = {
            let shared = shared.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("session-reader".to_string())
                .spawn(move || reader_loop(reader_stream, shared, ready_tx, role, auth, config, reader_log))
                .map_err(|err| NetError::Io(err.kind()))?
        };

        let writer = {
            let shared = shared.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("session-writer".to_string())
                .spawn(move || writer_loop(writer_stream, shared, ready_rx, config, writer_log))
                .map_err(|err| NetError::Io(err.kind()))?
        };

        Ok(Session {
            shared,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    /// Enqueues a packet for the peer. Blocks for space when the outbound queue is at
    /// capacity (backpressure); fails with `Closed` once shutdown has begun.
    #[inline]
    pub fn send(&self, packet: Packet) -> NetResult<()> {
        self.shared.outbound.push((0, packet))
    }

    /// Next fully decoded and decrypted event. `Wait` on timeout.
    #[inline]
    pub fn recv(&self, timeout: Duration) -> NetResult<SessionEvent> {
        self.shared.inbound.pop(timeout)
    }

    /// Cloneable sending side for the hub's fan-out.
    #[inline]
    pub fn sender(&self) -> SessionSender {
        SessionSender {
            shared: self.shared.clone(),
        }
    }

    /// Requests shutdown: a best-effort BYE, then queue drain and socket close.
    /// Idempotent.
    pub fn close(&self) {
        if !self.shared.closing.load(Ordering::Acquire) {
            let _ = self.shared.outbound.push((0, Packet::empty(PacketType::Bye)));
        }

        self.shared.request_close(CloseReason::Requested);
        self.shared.outbound.close();
    }

    #[inline]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.close_reason.lock().clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();

        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

/// Sending handle held by the hub for one registered peer.
#[derive(Clone)]
pub struct SessionSender {
    shared: Arc<Shared>,
}

impl SessionSender {
    /// Control-plane send; never dropped, blocks like `Session::send`.
    #[inline]
    pub fn send(&self, packet: Packet) -> NetResult<()> {
        self.shared.outbound.push((0, packet))
    }

    /// Fan-out send, stamped with the original sender. Never blocks: a full queue
    /// discards the oldest queued media packet instead. Returns whether a drop
    /// occurred.
    #[inline]
    pub fn route(&self, source: ClientId, packet: Packet) -> NetResult<bool> {
        self.shared.outbound.push_or_drop_oldest((source, packet))
    }

    /// Media packets discarded on this peer's outbound queue so far.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.shared.outbound.dropped()
    }

    pub fn close(&self) {
        self.shared.request_close(CloseReason::Requested);
        self.shared.outbound.close();
    }
}

/// Test access to a sender's outbound queue without a live socket.
#[cfg(test)]
pub(crate) struct SenderProbe {
    shared: Arc<Shared>,
}

#[cfg(test)]
impl SenderProbe {
    pub(crate) fn pop(&self, timeout: Duration) -> NetResult<(ClientId, Packet)> {
        self.shared.outbound.pop(timeout)
    }

    pub(crate) fn queued(&self) -> usize {
        self.shared.outbound.len()
    }
}

#[cfg(test)]
pub(crate) fn detached_sender(capacity: usize) -> (SessionSender, SenderProbe) {
    let shared = Arc::new(Shared {
        outbound: Mailbox::new(capacity),
        inbound: Mailbox::new(capacity),
        closing: AtomicBool::new(false),
        close_reason: Mutex::new(None),
    });

    (
        SessionSender {
            shared: shared.clone(),
        },
        SenderProbe { shared },
    )
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

struct ReaderState {
    handshake: Option<Handshake>,
    rx: Option<RxCrypto>,
    ready: bool,
    role: Role,
    encrypt: bool,
}

fn reader_loop(
    mut stream: TcpStream,
    shared: Arc<Shared>,
    ready_tx: channel::Sender<ReadySignal>,
    role: Role,
    auth: AuthConfig,
    config: SessionConfig,
    log: Logger,
) {
    stream.set_read_timeout(Some(TICK)).ok();

    let reason = run_reader(&mut stream, &shared, &ready_tx, role, auth, &config, &log);

    finish(&shared, reason, &log);
}

fn run_reader(
    stream: &mut TcpStream,
    shared: &Arc<Shared>,
    ready_tx: &channel::Sender<ReadySignal>,
    role: Role,
    auth: AuthConfig,
    config: &SessionConfig,
    log: &Logger,
) -> CloseReason {
    let mut buffer = Buffer::new(MAX_PACKET_BODY + HEADER_SIZE + 64);

    let mut state = ReaderState {
        handshake: None,
        rx: None,
        ready: false,
        role,
        encrypt: config.encrypt,
    };

    // Construct the handshake and (on the client) enqueue the opening offer.
    let mut handshake = match Handshake::new(role, auth, Instant::now(), config.handshake_budget) {
        Ok(handshake) => handshake,
        Err(err) => return CloseReason::from_error(err),
    };

    match handshake.initial_packets() {
        Ok(packets) => {
            for pkt in packets {
                if shared.outbound.push((0, pkt)).is_err() {
                    return CloseReason::Requested;
                }
            }
        }
        Err(err) => return CloseReason::from_error(err),
    }

    state.handshake = Some(handshake);

    let mut last_ingress = Instant::now();

    loop {
        if shared.closing.load(Ordering::Acquire) {
            return CloseReason::Requested;
        }

        if !state.ready {
            if let Some(handshake) = state.handshake.as_mut() {
                if handshake.check_deadline(Instant::now()).is_err() {
                    let cause = handshake.failure().unwrap_or(FailureCause::Timeout);
                    if role == Role::Server {
                        let _ = shared.outbound.push((0, rejection_packet(cause)));
                    }
                    return CloseReason::HandshakeFailed(cause);
                }
            }
        }

        match buffer.ingress(&mut *stream) {
            Ok(0) => return CloseReason::PeerClosed,
            Ok(_) => last_ingress = Instant::now(),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                // Idle tick; liveness is checked below.
            }
            Err(err) => return CloseReason::Io(err.kind()),
        }

        if last_ingress.elapsed() >= config.read_timeout {
            return CloseReason::Timeout;
        }

        loop {
            match codec::decode_next(&mut buffer) {
                Err(NetError::Wait) => break,
                Err(err) => return CloseReason::from_error(err),
                Ok(pkt) => match handle_packet(&pkt, &mut state, shared, ready_tx, log) {
                    Ok(()) => (),
                    Err(reason) => return reason,
                },
            }
        }
    }
}

fn handle_packet(
    pkt: &Packet,
    state: &mut ReaderState,
    shared: &Arc<Shared>,
    ready_tx: &channel::Sender<ReadySignal>,
    log: &Logger,
) -> Result<(), CloseReason> {
    if !state.ready {
        return handle_pre_ready(pkt, state, shared, ready_tx, log);
    }

    match pkt.ptype {
        PacketType::EncryptedEnvelope => handle_envelope(pkt, state, shared, log),
        // Tolerated: unknown future types outside the record layer.
        PacketType::Unknown(_) => Ok(()),
        _ => Err(CloseReason::Protocol(ProtocolError::UnexpectedType)),
    }
}

fn handle_pre_ready(
    pkt: &Packet,
    state: &mut ReaderState,
    shared: &Arc<Shared>,
    ready_tx: &channel::Sender<ReadySignal>,
    log: &Logger,
) -> Result<(), CloseReason> {
    if pkt.ptype == PacketType::Error {
        // The peer rejected the handshake and told us why.
        let cause = match packet::decode_error(&pkt.body) {
            Ok(info) => FailureCause::from_error_code(info.code),
            Err(_) => FailureCause::Protocol,
        };
        return Err(CloseReason::HandshakeFailed(cause));
    }

    if let PacketType::Unknown(code) = pkt.ptype {
        logging::debug!(log, "ignoring unknown packet type"; "code" => code);
        return Ok(());
    }

    if !pkt.ptype.is_handshake() {
        return Err(CloseReason::Protocol(ProtocolError::UnexpectedType));
    }

    let handshake = match state.handshake.as_mut() {
        Some(handshake) => handshake,
        None => return Err(CloseReason::Protocol(ProtocolError::UnexpectedType)),
    };

    match handshake.advance(pkt, Instant::now()) {
        Ok(responses) => {
            for response in responses {
                if shared.outbound.push((0, response)).is_err() {
                    return Err(CloseReason::Requested);
                }
            }
        }
        Err(_) => {
            let cause = handshake.failure().unwrap_or(FailureCause::Protocol);
            logging::warn!(log, "handshake failed"; "cause" => cause.describe());

            if state.role == Role::Server {
                let _ = shared.outbound.push((0, rejection_packet(cause)));
            }

            return Err(CloseReason::HandshakeFailed(cause));
        }
    }

    if handshake.is_ready() {
        let handshake = state.handshake.take().expect("handshake present");
        let peer_identity = handshake.peer_identity().copied();

        let (tx, rx, _) = match handshake.into_session() {
            Ok(halves) => halves,
            Err(err) => return Err(CloseReason::from_error(err)),
        };

        state.rx = Some(rx);
        state.ready = true;

        let signal = ReadySignal {
            tx: if state.encrypt { Some(tx) } else { None },
        };
        let _ = ready_tx.send(signal);

        logging::debug!(log, "session ready");

        let event = SessionEvent::Ready(PeerInfo {
            identity: peer_identity,
        });
        if shared.inbound.push(event).is_err() {
            return Err(CloseReason::Requested);
        }
    }

    Ok(())
}

fn handle_envelope(
    pkt: &Packet,
    state: &mut ReaderState,
    shared: &Arc<Shared>,
    log: &Logger,
) -> Result<(), CloseReason> {
    let routed = if state.encrypt {
        let rx = match state.rx.as_mut() {
            Some(rx) => rx,
            None => return Err(CloseReason::Crypto(CryptoError::KeyExchangeIncomplete)),
        };

        match rx.open(&pkt.body) {
            Ok(plain) => plain,
            Err(err) => return Err(CloseReason::from_error(err)),
        }
    } else {
        // Plaintext record: same layout, no MAC.
        if pkt.body.len() < 8 {
            return Err(CloseReason::Protocol(ProtocolError::Malformed));
        }
        pkt.body[8..].to_vec()
    };

    let (source, inner) = match codec::decode_routed(&routed) {
        Ok(decoded) => decoded,
        Err(err) => return Err(CloseReason::from_error(err)),
    };

    match inner.ptype {
        PacketType::Ping => {
            // Echo the nonce back; the envelope counter provides freshness.
            let pong = Packet::new(PacketType::Pong, inner.body);
            if shared.outbound.push((0, pong)).is_err() {
                return Err(CloseReason::Requested);
            }
            Ok(())
        }
        // Unmatched echoes may refer to superseded pings; never fatal.
        PacketType::Pong => Ok(()),
        PacketType::Bye => Err(CloseReason::ByeReceived),
        PacketType::Unknown(code) => {
            logging::debug!(log, "ignoring unknown enveloped type"; "code" => code);
            Ok(())
        }
        _ if inner.ptype.is_handshake() => {
            Err(CloseReason::Protocol(ProtocolError::UnexpectedType))
        }
        _ => {
            let is_media = inner.ptype.is_media();
            let event = SessionEvent::Packet {
                source,
                packet: inner,
            };

            let result = if is_media {
                shared.inbound.push_or_drop_oldest(event).map(|dropped| {
                    if dropped {
                        logging::debug!(log, "inbound media dropped"; "source" => source);
                    }
                })
            } else {
                shared.inbound.push(event)
            };

            result.map_err(|_| CloseReason::Requested)
        }
    }
}

fn finish(shared: &Arc<Shared>, reason: CloseReason, log: &Logger) {
    logging::debug!(log, "session closing"; "reason" => ?reason);

    shared.request_close(reason.clone());

    let _ = shared.inbound.push(SessionEvent::Closed(reason));
    shared.inbound.close();
    shared.outbound.close();
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

fn writer_loop(
    mut stream: TcpStream,
    shared: Arc<Shared>,
    ready_rx: channel::Receiver<ReadySignal>,
    config: SessionConfig,
    log: Logger,
) {
    let mut tx: Option<TxCrypto> = None;
    let mut ready = false;
    let mut plain_seq: u64 = 0;
    let mut last_egress = Instant::now();

    loop {
        if let Ok(signal) = ready_rx.try_recv() {
            tx = signal.tx;
            ready = true;
        }

        match shared.outbound.pop(config.ping_interval.min(TICK)) {
            Ok((source, pkt)) => {
                if let Ok(signal) = ready_rx.try_recv() {
                    tx = signal.tx;
                    ready = true;
                }

                let bytes = match wire_bytes(&pkt, source, ready, &mut tx, &mut plain_seq) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        logging::warn!(log, "outbound packet dropped"; "error" => %err);
                        shared.request_close(CloseReason::from_error(err));
                        break;
                    }
                };

                if let Err(err) = stream.write_all(&bytes) {
                    shared.request_close(CloseReason::Io(err.kind()));
                    break;
                }

                last_egress = Instant::now();
            }
            Err(NetError::Wait) => {
                if ready && last_egress.elapsed() >= config.ping_interval {
                    let ping = Packet::new(
                        PacketType::Ping,
                        packet::encode_ping_nonce(packet::fresh_ping_nonce()),
                    );

                    match wire_bytes(&ping, 0, ready, &mut tx, &mut plain_seq) {
                        Ok(bytes) => {
                            if let Err(err) = stream.write_all(&bytes) {
                                shared.request_close(CloseReason::Io(err.kind()));
                                break;
                            }
                            last_egress = Instant::now();
                        }
                        Err(err) => {
                            shared.request_close(CloseReason::from_error(err));
                            break;
                        }
                    }
                }
            }
            // Queue closed and drained: flush is complete.
            Err(_) => break,
        }
    }

    stream.flush().ok();
    stream.shutdown(Shutdown::Both).ok();

    logging::trace!(log, "writer stopped");
}

/// Frames one outbound packet. Handshake-family packets travel in the clear; once the
/// session is ready everything else rides in a record: encrypted when the record layer
/// is on, a counter-prefixed plaintext otherwise.
fn wire_bytes(
    pkt: &Packet,
    source: ClientId,
    ready: bool,
    tx: &mut Option<TxCrypto>,
    plain_seq: &mut u64,
) -> NetResult<Vec<u8>> {
    if !ready || pkt.ptype.is_handshake() {
        return codec::encode_packet(pkt);
    }

    let routed = codec::encode_routed(source, pkt)?;

    let body = match tx {
        Some(tx) => tx.seal(&routed)?,
        None => {
            let mut body = vec![0u8; 8 + routed.len()];
            BigEndian::write_u64(&mut body[..8], *plain_seq);
            body[8..].copy_from_slice(&routed);
            *plain_seq = plain_seq.wrapping_add(1);
            body
        }
    };

    codec::encode(PacketType::EncryptedEnvelope, &body)
}
