use crate::net::channel::{Session, SessionConfig, SessionEvent, SessionSender};
use crate::net::handshake::AuthConfig;
use crate::net::packet::{self, Packet, PacketType};
use crate::net::{NetError, NetResult};
use crate::ClientId;
use crossbeam_channel as channel;
use indexmap::IndexMap;
use quartz::logging::{self, Logger};
use std::net::TcpListener;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const RUNNER_TICK: Duration = Duration::from_millis(250);

/// Messages feeding the single hub thread. Per-source packet order is preserved by the
/// channel's FIFO; the hub serializes all registry mutations.
pub enum HubMsg {
    Join {
        id: ClientId,
        name: String,
        identity: [u8; 32],
        sender: SessionSender,
    },
    Packet {
        source: ClientId,
        packet: Packet,
    },
    Leave {
        id: ClientId,
    },
}

struct Peer {
    name: String,
    identity: [u8; 32],
    sender: SessionSender,
}

/// Registry of connected clients and the fan-out engine. Owned by exactly one thread;
/// everything else talks to it through `HubMsg`.
pub struct Hub {
    registry: IndexMap<ClientId, Peer>,
    generation: u64,
    log: Logger,
}

impl Hub {
    pub fn new(log: Logger) -> Hub {
        Hub {
            registry: IndexMap::new(),
            generation: 0,
            log,
        }
    }

    #[inline]
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn handle(&mut self, msg: HubMsg) {
        match msg {
            HubMsg::Join {
                id,
                name,
                identity,
                sender,
            } => self.join(id, name, identity, sender),
            HubMsg::Packet { source, packet } => self.dispatch(source, packet),
            HubMsg::Leave { id } => self.leave(id),
        }
    }

    fn join(&mut self, id: ClientId, name: String, identity: [u8; 32], sender: SessionSender) {
        logging::info!(self.log, "client joined"; "client_id" => id, "name" => &name);

        // Existing peers learn about the newcomer first.
        let join_pkt = Packet::new(
            PacketType::Join,
            packet::encode_join(&packet::Join {
                id,
                identity,
                name: name.clone(),
            }),
        );
        self.broadcast_control(join_pkt, Some(id));

        self.registry.insert(
            id,
            Peer {
                name,
                identity,
                sender,
            },
        );

        // The authoritative roster goes to everyone, the joiner included: it is the
        // joining client's first post-handshake packet.
        self.broadcast_roster();
    }

    fn leave(&mut self, id: ClientId) {
        // Removal is idempotent; a session error and a BYE may both report it.
        let peer = match self.registry.shift_remove(&id) {
            Some(peer) => peer,
            None => return,
        };

        logging::info!(self.log, "client left";
                       "client_id" => id,
                       "name" => &peer.name,
                       "media_dropped" => peer.sender.dropped());
        peer.sender.close();

        let leave_pkt = Packet::new(PacketType::Leave, packet::encode_leave(id));
        self.broadcast_control(leave_pkt, None);

        self.broadcast_roster();
    }

    fn dispatch(&mut self, source: ClientId, packet: Packet) {
        if !packet.ptype.is_media() {
            // Post-handshake control from clients carries nothing the hub acts on
            // today; departure arrives as a session close, not as a packet.
            logging::debug!(self.log, "ignoring non-media packet";
                            "client_id" => source,
                            "type" => ?packet.ptype);
            return;
        }

        if !self.registry.contains_key(&source) {
            return;
        }

        let mut dead = Vec::new();

        for (&id, peer) in self.registry.iter() {
            if id == source {
                continue;
            }

            match peer.sender.route(source, packet.clone()) {
                Ok(true) => {
                    logging::debug!(self.log, "media dropped for slow receiver";
                                    "receiver" => id,
                                    "source" => source);
                }
                Ok(false) => (),
                Err(_) => dead.push(id),
            }
        }

        for id in dead {
            self.leave(id);
        }
    }

    fn roster_packet(&self) -> Packet {
        let members = self
            .registry
            .iter()
            .map(|(&id, peer)| packet::RosterMember {
                id,
                identity: peer.identity,
                name: peer.name.clone(),
            })
            .collect();

        let roster = packet::Roster {
            generation: self.generation,
            members,
        };

        Packet::new(PacketType::Roster, packet::encode_roster(&roster))
    }

    fn broadcast_roster(&mut self) {
        self.generation += 1;

        let pkt = self.roster_packet();
        self.broadcast_control(pkt, None);
    }

    fn broadcast_control(&mut self, pkt: Packet, skip: Option<ClientId>) {
        let mut dead = Vec::new();

        for (&id, peer) in self.registry.iter() {
            if skip == Some(id) {
                continue;
            }

            if peer.sender.send(pkt.clone()).is_err() {
                dead.push(id);
            }
        }

        for id in dead {
            self.leave(id);
        }
    }
}

/// Clonable handle the per-connection runners use to feed the hub.
#[derive(Clone)]
pub struct HubHandle {
    tx: channel::Sender<HubMsg>,
}

impl HubHandle {
    #[inline]
    pub fn send(&self, msg: HubMsg) -> NetResult<()> {
        self.tx.send(msg).map_err(|_| NetError::Closed)
    }
}

/// Spawns the hub thread. The thread exits once every handle is dropped.
pub fn start_hub(log: &Logger) -> NetResult<(HubHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = channel::unbounded();
    let hub_log = log.new(logging::o!("task" => "hub"));

    let handle = thread::Builder::new()
        .name("hub".to_string())
        .spawn(move || {
            let mut hub = Hub::new(hub_log);
            while let Ok(msg) = rx.recv() {
                hub.handle(msg);
            }
        })
        .map_err(|err| NetError::Io(err.kind()))?;

    Ok((HubHandle { tx }, handle))
}

/// Accept loop: one `ConnectionSession` per TCP connection, one runner thread driving
/// it from handshake to departure. Never returns under normal operation.
pub fn serve(
    listener: TcpListener,
    auth: AuthConfig,
    session_config: SessionConfig,
    max_clients: usize,
    log: &Logger,
) -> NetResult<()> {
    let (hub, _hub_thread) = start_hub(log)?;

    let next_id = Arc::new(AtomicU32::new(1));
    let active = Arc::new(AtomicUsize::new(0));

    let local_addr = listener.local_addr().map_err(NetError::from)?;
    logging::info!(log, "listening"; "address" => %local_addr);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                logging::warn!(log, "accept failed"; "error" => %err);
                continue;
            }
        };

        if active.load(Ordering::Acquire) >= max_clients {
            logging::warn!(log, "connection refused, server full";
                           "max_clients" => max_clients);
            drop(stream);
            continue;
        }

        let runner_log = log.new(logging::o!("task" => "runner"));
        let auth = auth.clone();
        let config = session_config.clone();
        let hub = hub.clone();
        let next_id = next_id.clone();
        let active = active.clone();

        let spawned = thread::Builder::new().name("runner".to_string()).spawn(move || {
            active.fetch_add(1, Ordering::AcqRel);
            run_connection(stream, auth, config, hub, next_id, runner_log);
            active.fetch_sub(1, Ordering::AcqRel);
        });

        if let Err(err) = spawned {
            logging::error!(log, "failed to spawn runner"; "error" => %err);
        }
    }

    Ok(())
}

/// Drives one server-side session: handshake, HELLO, registration, then packet
/// forwarding until the session dies.
fn run_connection(
    stream: std::net::TcpStream,
    auth: AuthConfig,
    config: SessionConfig,
    hub: HubHandle,
    next_id: Arc<AtomicU32>,
    log: Logger,
) {
    let hello_deadline = config.handshake_budget;

    let session = match Session::accept(stream, auth, config, &log) {
        Ok(session) => session,
        Err(err) => {
            logging::warn!(log, "session setup failed"; "error" => %err);
            return;
        }
    };

    // Phase 1: the handshake must complete before anything else is accepted.
    let peer = loop {
        match session.recv(RUNNER_TICK) {
            Ok(SessionEvent::Ready(peer)) => break peer,
            Ok(SessionEvent::Closed(reason)) => {
                logging::debug!(log, "session ended before ready"; "reason" => ?reason);
                return;
            }
            Ok(SessionEvent::Packet { .. }) => return,
            Err(NetError::Wait) => continue,
            Err(_) => return,
        }
    };

    // Phase 2: the first application packet must introduce the client.
    let started = Instant::now();
    let hello = loop {
        if started.elapsed() > hello_deadline {
            logging::warn!(log, "client never sent hello");
            session.close();
            return;
        }

        match session.recv(RUNNER_TICK) {
            Ok(SessionEvent::Packet { packet, .. }) if packet.ptype == PacketType::Hello => {
                match packet::decode_hello(&packet.body) {
                    Ok(hello) => break hello,
                    Err(_) => {
                        session.close();
                        return;
                    }
                }
            }
            // Media racing ahead of the introduction is discarded.
            Ok(SessionEvent::Packet { .. }) => continue,
            Ok(SessionEvent::Closed(_)) => return,
            Ok(SessionEvent::Ready(_)) => continue,
            Err(NetError::Wait) => continue,
            Err(_) => return,
        }
    };

    let id = next_id.fetch_add(1, Ordering::AcqRel);
    let identity = peer.identity.unwrap_or([0u8; 32]);

    let joined = hub.send(HubMsg::Join {
        id,
        name: hello.name.clone(),
        identity,
        sender: session.sender(),
    });
    if joined.is_err() {
        session.close();
        return;
    }

    // Phase 3: forward everything to the hub until the session closes.
    loop {
        match session.recv(RUNNER_TICK) {
            Ok(SessionEvent::Packet { packet, .. }) => {
                if hub.send(HubMsg::Packet { source: id, packet }).is_err() {
                    break;
                }
            }
            Ok(SessionEvent::Closed(reason)) => {
                logging::debug!(log, "session closed"; "client_id" => id, "reason" => ?reason);
                break;
            }
            Ok(SessionEvent::Ready(_)) => continue,
            Err(NetError::Wait) => continue,
            Err(_) => break,
        }
    }

    let _ = hub.send(HubMsg::Leave { id });
}
