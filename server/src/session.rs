//! Per-connection session engine.
//!
//! A [`Session`] is the shared handle other parts of the server use to talk to
//! one client: it owns the two outbound queues, the link and login state
//! machines, and the kick primitives. The connection itself is driven by a
//! worker task started with [`run_session`]:
//!
//! 1. The login sequence reads the handshake directly, with I/O timeouts.
//! 2. A reader task then decodes inbound frames and hands them to the worker
//!    over a channel.
//! 3. Each worker iteration drains the control queue, drains the block queue
//!    up to the send throttle, handles a pending map change, dispatches every
//!    frame that has arrived, and sleeps briefly.
//!
//! No lock is held across an await point. Lock order is link state first,
//! then either queue.

use crate::blocks::{EditOutcome, EditRequest, Editor, PlacementModes, HACKING_DETECTED};
use crate::chat::{self, ChatAction, ChatState, SYSTEM_COLOR};
use crate::codec::{CodecError, LoggingStream, PacketReader, PacketWriter};
use crate::map::Map;
use crate::movement::{Movement, MovementHandler};
use crate::names;
use crate::network::Server;
use crate::spam::{SendThrottle, SpamLog, THROTTLE_INTERVAL, THROTTLE_THRESHOLD};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use shared::{
    chunk_packets, compress_map, ClientPacket, Position, ProtocolError, ServerPacket,
    EXTENSION_MAGIC, PERMISSION_NORMAL, PERMISSION_OP, PROTOCOL_VERSION, SELF_ID,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Pause between worker iterations.
pub const SLEEP_DELAY: Duration = Duration::from_millis(5);

/// Highest entity id a remote player can have.
pub const MAX_ENTITY_ID: u8 = 126;

/// Frames buffered between the reader task and the worker.
const INBOUND_CAPACITY: usize = 256;

/// Login progress. `Rejected` and `Disconnected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    AwaitingHandshake,
    AwaitingNameCheck,
    AwaitingVerification,
    AwaitingWhitelist,
    Registered,
    Active,
    Rejected,
    Disconnected,
}

impl LoginState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoginState::Rejected | LoginState::Disconnected)
    }

    pub fn can_transition(self, next: LoginState) -> bool {
        use LoginState::*;
        match (self, next) {
            (AwaitingHandshake, AwaitingNameCheck)
            | (AwaitingNameCheck, AwaitingVerification)
            | (AwaitingVerification, AwaitingWhitelist)
            | (AwaitingWhitelist, Registered)
            | (Registered, Active) => true,
            (Active, Rejected) => false,
            (from, Rejected | Disconnected) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Transport capabilities. A kick moves `Open` to `Kicking`, which stops
/// receiving and queueing but still lets queued packets, the kick included,
/// be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Open,
    Kicking,
    Closed,
}

impl LinkState {
    pub fn can_receive(self) -> bool {
        self == LinkState::Open
    }

    pub fn can_queue(self) -> bool {
        self == LinkState::Open
    }

    pub fn can_send(self) -> bool {
        self != LinkState::Closed
    }

    pub fn can_transition(self, next: LinkState) -> bool {
        matches!(
            (self, next),
            (LinkState::Open, LinkState::Kicking)
                | (LinkState::Open, LinkState::Closed)
                | (LinkState::Kicking, LinkState::Closed)
        )
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("rejected at login: {0}")]
    Rejected(String),
    #[error("kicked ({reason}): {cause}")]
    Kicked { reason: String, cause: String },
    #[error("illegal login transition {from:?} -> {to:?}")]
    IllegalTransition { from: LoginState, to: LoginState },
    #[error("could not prepare map: {0}")]
    MapTransfer(#[source] std::io::Error),
}

impl SessionError {
    /// Transport failures are ordinary disconnects.
    pub fn is_transport(&self) -> bool {
        matches!(self, SessionError::Codec(e) if e.is_transport())
    }
}

#[derive(Default)]
struct KickWaiters {
    done: bool,
    senders: Vec<oneshot::Sender<()>>,
}

/// Shared handle to one connected client.
pub struct Session {
    addr: SocketAddr,
    name: RwLock<String>,
    slot: Mutex<Option<u8>>,
    is_op: AtomicBool,
    announced: AtomicBool,
    uses_custom_blocks: AtomicBool,

    login: Mutex<LoginState>,
    link: Mutex<LinkState>,
    control_queue: Mutex<VecDeque<ServerPacket>>,
    block_queue: Mutex<VecDeque<ServerPacket>>,

    map_to_join: Mutex<Arc<Map>>,
    current_map: AtomicU64,
    position: Mutex<Position>,
    modes: Mutex<PlacementModes>,
    last_active: Mutex<Instant>,

    kick_waiters: Mutex<KickWaiters>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &*self.name.read())
            .field("addr", &self.addr)
            .field("slot", &*self.slot.lock())
            .finish()
    }
}

impl Session {
    pub fn new(addr: SocketAddr, map: Arc<Map>) -> Self {
        let spawn = map.spawn();
        Self {
            addr,
            name: RwLock::new(format!("from {}", addr.ip())),
            slot: Mutex::new(None),
            is_op: AtomicBool::new(false),
            announced: AtomicBool::new(false),
            uses_custom_blocks: AtomicBool::new(false),
            login: Mutex::new(LoginState::AwaitingHandshake),
            link: Mutex::new(LinkState::Open),
            control_queue: Mutex::new(VecDeque::new()),
            block_queue: Mutex::new(VecDeque::new()),
            current_map: AtomicU64::new(map.id()),
            map_to_join: Mutex::new(map),
            position: Mutex::new(spawn),
            modes: Mutex::new(PlacementModes::default()),
            last_active: Mutex::new(Instant::now()),
            kick_waiters: Mutex::new(KickWaiters::default()),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    pub fn slot(&self) -> Option<u8> {
        *self.slot.lock()
    }

    pub(crate) fn set_slot(&self, slot: Option<u8>) {
        *self.slot.lock() = slot;
    }

    pub fn is_op(&self) -> bool {
        self.is_op.load(Ordering::Acquire)
    }

    /// Changes operator status, telling the client about its new permission
    /// level if it changed.
    pub fn set_op(&self, is_op: bool, can_use_solid: bool) {
        if self.is_op.swap(is_op, Ordering::AcqRel) != is_op {
            self.send(ServerPacket::SetPermission {
                permission: permission_byte(can_use_solid),
            });
        }
    }

    pub fn is_announced(&self) -> bool {
        self.announced.load(Ordering::Acquire)
    }

    pub fn uses_custom_blocks(&self) -> bool {
        self.uses_custom_blocks.load(Ordering::Acquire)
    }

    pub fn login_state(&self) -> LoginState {
        *self.login.lock()
    }

    pub fn link_state(&self) -> LinkState {
        *self.link.lock()
    }

    pub fn current_map_id(&self) -> u64 {
        self.current_map.load(Ordering::Acquire)
    }

    pub fn position(&self) -> Position {
        *self.position.lock()
    }

    fn set_position(&self, position: Position) {
        *self.position.lock() = position;
    }

    pub fn modes(&self) -> PlacementModes {
        *self.modes.lock()
    }

    pub fn update_modes(&self, update: impl FnOnce(&mut PlacementModes)) -> PlacementModes {
        let mut modes = self.modes.lock();
        update(&mut modes);
        *modes
    }

    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn idle_time(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    /// Moves the login state machine forward.
    pub fn advance(&self, next: LoginState) -> Result<(), SessionError> {
        let mut login = self.login.lock();
        if !login.can_transition(next) {
            return Err(SessionError::IllegalTransition {
                from: *login,
                to: next,
            });
        }
        *login = next;
        Ok(())
    }

    fn close_link(&self) {
        let mut link = self.link.lock();
        if link.can_transition(LinkState::Closed) {
            *link = LinkState::Closed;
        }
    }

    /// Queues a packet. Block updates go to the throttled block queue,
    /// everything else to the control queue. Returns `false` once the
    /// session stopped accepting packets.
    pub fn send(&self, packet: ServerPacket) -> bool {
        let link = self.link.lock();
        if !link.can_queue() {
            return false;
        }
        match packet {
            ServerPacket::SetBlock { .. } => self.block_queue.lock().push_back(packet),
            _ => self.control_queue.lock().push_back(packet),
        }
        true
    }

    /// Sends a server message, wrapped to fit the chat line.
    pub fn message(&self, text: &str) {
        for line in chat::wrap_lines(&format!("{}{}", SYSTEM_COLOR, text)) {
            self.send(ServerPacket::Message { id: 0, text: line });
        }
    }

    /// Asks the worker to write a kick and close the connection. Packets
    /// queued before the kick are still written; later ones are dropped.
    /// Returns `false` if the session was already being kicked or closed.
    pub fn kick(&self, reason: &str) -> bool {
        let mut link = self.link.lock();
        if !link.can_transition(LinkState::Kicking) {
            return false;
        }
        *link = LinkState::Kicking;
        self.control_queue.lock().push_back(ServerPacket::Kick {
            reason: reason.to_string(),
        });
        true
    }

    /// Kicks and waits, up to `bound`, for the worker to finish tearing the
    /// session down. Returns `true` if it did.
    pub async fn kick_and_wait(&self, reason: &str, bound: Duration) -> bool {
        let done = {
            let mut waiters = self.kick_waiters.lock();
            if waiters.done {
                return true;
            }
            let (tx, rx) = oneshot::channel();
            waiters.senders.push(tx);
            rx
        };
        self.kick(reason);
        matches!(tokio::time::timeout(bound, done).await, Ok(Ok(())))
    }

    /// Schedules a switch to `map`, picked up by the worker's next iteration.
    pub fn change_map(&self, map: Arc<Map>) {
        *self.map_to_join.lock() = map;
    }

    fn map_to_join(&self) -> Arc<Map> {
        self.map_to_join.lock().clone()
    }

    /// Marks the session closed and releases everyone waiting on a kick.
    fn finish(&self) {
        self.close_link();
        {
            let mut login = self.login.lock();
            if !login.is_terminal() {
                *login = LoginState::Disconnected;
            }
        }
        let mut waiters = self.kick_waiters.lock();
        waiters.done = true;
        for sender in waiters.senders.drain(..) {
            let _ = sender.send(());
        }
    }

    #[cfg(test)]
    pub(crate) fn test_take_control_queue(&self) -> Vec<ServerPacket> {
        self.control_queue.lock().drain(..).collect()
    }

    #[cfg(test)]
    pub(crate) fn test_take_block_queue(&self) -> Vec<ServerPacket> {
        self.block_queue.lock().drain(..).collect()
    }

    #[cfg(test)]
    pub(crate) fn test_set_name(&self, name: &str) {
        self.set_name(name);
    }

    #[cfg(test)]
    pub(crate) fn test_set_announced(&self) {
        self.announced.store(true, Ordering::Release);
    }
}

pub fn permission_byte(can_use_solid: bool) -> u8 {
    if can_use_solid {
        PERMISSION_OP
    } else {
        PERMISSION_NORMAL
    }
}

type Reader<S> = PacketReader<LoggingStream<ReadHalf<S>>>;
type Writer<S> = PacketWriter<LoggingStream<WriteHalf<S>>>;
type Inbound = Result<ClientPacket, CodecError>;

enum Flow {
    Continue,
    Stop,
}

struct Worker<S> {
    server: Arc<Server>,
    session: Arc<Session>,
    writer: Writer<S>,
    map: Arc<Map>,
    chat: ChatState,
    block_spam: SpamLog,
    movement: MovementHandler,
    throttle: SendThrottle,
    reader_task: Option<JoinHandle<()>>,
}

/// Serves one client connection until it ends.
pub async fn run_session<S>(server: Arc<Server>, stream: S, addr: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let map = server.map();
    let session = Arc::new(Session::new(addr, map.clone()));
    let (read_half, write_half) = tokio::io::split(stream);
    let reader = PacketReader::new(LoggingStream::new(read_half, format!("{} in", addr)));
    let writer = PacketWriter::new(LoggingStream::new(write_half, format!("{} out", addr)));

    let mut worker = Worker {
        movement: MovementHandler::new(map.spawn()),
        server,
        session,
        writer,
        map,
        chat: ChatState::new(),
        block_spam: SpamLog::blocks(),
        throttle: SendThrottle::new(THROTTLE_THRESHOLD, THROTTLE_INTERVAL, Instant::now()),
        reader_task: None,
    };

    match worker.run(reader).await {
        Ok(()) => debug!("Session {} ended", worker.session.name()),
        Err(e) if e.is_transport() => {
            debug!("Session {} disconnected: {}", worker.session.name(), e)
        }
        Err(SessionError::Rejected(reason)) => {
            warn!("Player {}: {}", worker.session.name(), reason)
        }
        Err(SessionError::Kicked { reason, cause }) => {
            warn!("Player {} was kicked ({}): {}", worker.session.name(), reason, cause)
        }
        Err(e) => error!("Session {} crashed: {}", worker.session.name(), e),
    }
    worker.teardown().await;
}

impl<S> Worker<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn run(&mut self, mut reader: Reader<S>) -> Result<(), SessionError> {
        self.login(&mut reader).await?;

        let (tx, mut rx) = mpsc::channel::<Inbound>(INBOUND_CAPACITY);
        self.reader_task = Some(tokio::spawn(async move {
            loop {
                let frame = reader.next_frame::<ClientPacket>().await;
                let failed = frame.is_err();
                if tx.send(frame).await.is_err() || failed {
                    break;
                }
            }
        }));

        while self.session.link_state().can_send() {
            if let Flow::Stop = self.drain_control_queue().await? {
                return Ok(());
            }
            self.drain_block_queue().await?;
            self.check_map_change().await?;

            while self.session.link_state().can_receive() {
                match rx.try_recv() {
                    Ok(Ok(packet)) => self.dispatch(packet).await?,
                    Ok(Err(e)) => return Err(self.on_inbound_error(e).await),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        return Err(CodecError::Closed.into())
                    }
                }
            }

            self.writer.flush().await?;
            tokio::time::sleep(SLEEP_DELAY).await;
        }
        Ok(())
    }

    async fn login(&mut self, reader: &mut Reader<S>) -> Result<(), SessionError> {
        let addr = self.session.addr();
        let (protocol_version, name, verification_key, magic) =
            match reader.read_frame::<ClientPacket>().await {
                Ok(ClientPacket::Handshake {
                    protocol_version,
                    name,
                    verification_key,
                    magic,
                }) => (protocol_version, name, verification_key, magic),
                Ok(other) => {
                    self.session.advance(LoginState::Rejected)?;
                    return Err(SessionError::Rejected(format!(
                        "unexpected handshake opcode ({:?})",
                        other.opcode()
                    )));
                }
                Err(CodecError::Protocol(e)) => {
                    self.session.advance(LoginState::Rejected)?;
                    return Err(SessionError::Rejected(format!("bad handshake ({})", e)));
                }
                Err(e) => return Err(e.into()),
            };

        if protocol_version != PROTOCOL_VERSION {
            self.session.advance(LoginState::Rejected)?;
            return Err(SessionError::Rejected(format!(
                "wrong protocol version ({}) from {}",
                protocol_version, addr
            )));
        }
        self.session.advance(LoginState::AwaitingNameCheck)?;

        if !names::is_valid_name(&name) {
            return Err(self
                .reject_now("Unacceptable player name.", format!("unacceptable name {:?}", name))
                .await);
        }
        self.session.advance(LoginState::AwaitingVerification)?;

        let server = Arc::clone(&self.server);
        let config = &server.config;
        if config.verify_names && !names::verify_name(&server.salt, &name, &verification_key) {
            return Err(self
                .reject_now("Could not verify player name.", format!("could not verify {}", name))
                .await);
        }
        self.session.set_name(&name);
        self.session.advance(LoginState::AwaitingWhitelist)?;

        if config.use_whitelist && !server.whitelist.contains(&name) {
            return Err(self
                .reject_now("You are not on the whitelist!", "not on the whitelist")
                .await);
        }

        self.session
            .uses_custom_blocks
            .store(config.custom_blocks && magic == EXTENSION_MAGIC, Ordering::Release);
        self.session
            .is_op
            .store(server.ops.contains(&name), Ordering::Release);

        if let Err(e) = server.players.register(&self.session) {
            self.session.advance(LoginState::Rejected)?;
            return Err(SessionError::Rejected(format!("could not register: {}", e)));
        }
        self.session.advance(LoginState::Registered)?;

        let can_use_solid = self.server.config.can_use_solid(self.session.is_op());
        self.writer
            .write_frame(&ServerPacket::Handshake {
                protocol_version: PROTOCOL_VERSION,
                server_name: self.server.config.server_name.clone(),
                motd: self.server.config.motd.clone(),
                permission: permission_byte(can_use_solid),
            })
            .await?;
        let map = self.map.clone();
        self.send_map(&map).await?;
        self.session.advance(LoginState::Active)?;
        info!("Player {} connected from {}", name, addr);

        self.server
            .players
            .message_all(self.session.slot(), &format!("Player {} connected.", name));
        self.session.announced.store(true, Ordering::Release);
        self.session.message(&self.server.config.motd);
        self.server.players.spawn_players(&self.session);
        self.server
            .commands
            .dispatch(&self.server, &self.session, "/players");
        Ok(())
    }

    /// Writes the whole map: begin marker, compressed chunks, dimensions, and
    /// the player's own spawn.
    async fn send_map(&mut self, map: &Map) -> Result<(), SessionError> {
        self.writer.write_frame(&ServerPacket::MapBegin).await?;

        let raw = if self.session.uses_custom_blocks() {
            map.block_bytes()
        } else {
            map.fallback_bytes()
        };
        let compressed = tokio::task::spawn_blocking(move || compress_map(&raw))
            .await
            .map_err(|e| SessionError::MapTransfer(std::io::Error::new(std::io::ErrorKind::Other, e)))?
            .map_err(SessionError::MapTransfer)?;
        for chunk in chunk_packets(&compressed) {
            self.writer.write_frame(&chunk).await?;
        }

        self.writer
            .write_frame(&ServerPacket::MapEnd {
                width: map.width() as i16,
                height: map.height() as i16,
                length: map.length() as i16,
            })
            .await?;

        let spawn = map.spawn();
        self.writer
            .write_frame(&ServerPacket::AddEntity {
                id: SELF_ID,
                name: self.session.name(),
                position: spawn,
            })
            .await?;
        self.writer
            .write_frame(&ServerPacket::Teleport {
                id: SELF_ID,
                position: spawn,
            })
            .await?;
        self.writer.flush().await?;

        self.movement.reset(spawn);
        self.session.set_position(spawn);
        Ok(())
    }

    async fn drain_control_queue(&mut self) -> Result<Flow, SessionError> {
        loop {
            let next = self.session.control_queue.lock().pop_front();
            let Some(packet) = next else {
                return Ok(Flow::Continue);
            };
            self.writer.write_frame(&packet).await?;
            if let ServerPacket::Kick { reason } = &packet {
                self.writer.flush().await?;
                self.session.close_link();
                info!("Player {} was kicked: {}", self.session.name(), reason);
                return Ok(Flow::Stop);
            }
        }
    }

    async fn drain_block_queue(&mut self) -> Result<(), SessionError> {
        while self.throttle.has_capacity() && self.session.link_state().can_send() {
            let next = self.session.block_queue.lock().pop_front();
            let Some(packet) = next else {
                break;
            };
            let packet = self.outgoing(packet);
            self.writer.write_frame(&packet).await?;
            self.throttle.record();
        }
        self.throttle.refresh(Instant::now());
        Ok(())
    }

    /// Rewrites extended block types for clients that cannot show them.
    fn outgoing(&self, packet: ServerPacket) -> ServerPacket {
        match packet {
            ServerPacket::SetBlock { x, y, z, block } if !self.session.uses_custom_blocks() => {
                ServerPacket::SetBlock {
                    x,
                    y,
                    z,
                    block: block.fallback(),
                }
            }
            other => other,
        }
    }

    async fn check_map_change(&mut self) -> Result<(), SessionError> {
        let target = self.session.map_to_join();
        if target.id() == self.map.id() {
            return Ok(());
        }
        let old_map = std::mem::replace(&mut self.map, target.clone());
        self.session.current_map.store(target.id(), Ordering::Release);
        self.session.block_queue.lock().clear();
        self.server.players.despawn(&self.session, old_map.id());

        for id in 1..=MAX_ENTITY_ID {
            self.writer
                .write_frame(&ServerPacket::RemoveEntity { id })
                .await?;
        }
        self.send_map(&target).await?;
        self.server.players.spawn_players(&self.session);
        info!("Player {} joined map {}", self.session.name(), target.id());
        Ok(())
    }

    async fn dispatch(&mut self, packet: ClientPacket) -> Result<(), SessionError> {
        match packet {
            ClientPacket::Message { text, .. } => self.handle_message(&text).await,
            ClientPacket::Teleport { position, .. } => {
                self.handle_movement(position);
                Ok(())
            }
            ClientPacket::SetBlock {
                x,
                y,
                z,
                mode,
                block,
            } => {
                let request = EditRequest {
                    x,
                    y,
                    z,
                    deleting: mode == 0,
                    raw_block: block,
                };
                self.handle_set_block(request).await
            }
            ClientPacket::Ping => Ok(()),
            other => {
                let opcode = other.opcode();
                Err(self
                    .kick_now(
                        &format!("Unknown packet opCode {:?}", opcode),
                        format!("sent an invalid opcode ({:?})", opcode),
                    )
                    .await)
            }
        }
    }

    async fn on_inbound_error(&mut self, e: CodecError) -> SessionError {
        match e {
            CodecError::Protocol(ProtocolError::UnknownOpCode(op)) => {
                self.kick_now(
                    &format!("Unknown packet opCode {}", op),
                    format!("sent an invalid opcode ({})", op),
                )
                .await
            }
            CodecError::Protocol(ProtocolError::WrongDirection(op)) => {
                self.kick_now(
                    &format!("Unknown packet opCode {:?}", op),
                    format!("sent a server-only opcode ({:?})", op),
                )
                .await
            }
            CodecError::Protocol(other) => {
                self.kick_now(HACKING_DETECTED, format!("sent a malformed frame ({})", other))
                    .await
            }
            transport => transport.into(),
        }
    }

    async fn handle_message(&mut self, text: &str) -> Result<(), SessionError> {
        self.session.touch();
        let limit = self.server.config.limits_chat_rate(self.session.is_op());
        let action = match self.chat.receive(text, Instant::now(), limit) {
            Ok(action) => action,
            Err(violation) => {
                return Err(self
                    .kick_now(violation.kick_reason(), violation.to_string())
                    .await)
            }
        };
        match action {
            ChatAction::Ignore => {}
            ChatAction::Reply(reply) => self.session.message(&reply),
            ChatAction::Command(command) => {
                info!(target: "chat", "{} used {}", self.session.name(), command);
                self.server
                    .commands
                    .dispatch(&self.server, &self.session, &command);
            }
            ChatAction::Broadcast(message) => {
                let name = self.session.name();
                info!(target: "chat", "{}: {}", name, message);
                let config = &self.server.config;
                let color = (config.reveal_ops && self.session.is_op()).then_some(config.op_color.as_str());
                self.server
                    .players
                    .message_all(None, &chat::format_chat(&name, color, &message));
            }
        }
        Ok(())
    }

    fn handle_movement(&mut self, position: Position) {
        match self.movement.process(&self.map, position) {
            Movement::Unchanged => {}
            Movement::Moved(position) => {
                self.session.set_position(position);
                if let Some(slot) = self.session.slot() {
                    self.server.players.send_to_map(
                        self.map.id(),
                        Some(slot),
                        ServerPacket::Teleport { id: slot, position },
                    );
                }
            }
            Movement::Rejected(position) => {
                self.session.send(ServerPacket::Teleport {
                    id: SELF_ID,
                    position,
                });
            }
        }
    }

    async fn handle_set_block(&mut self, request: EditRequest) -> Result<(), SessionError> {
        self.session.touch();
        let editor = Editor {
            config: &self.server.config,
            slot: self.session.slot(),
            is_op: self.session.is_op(),
            uses_custom_blocks: self.session.uses_custom_blocks(),
            modes: self.session.modes(),
            position: self.movement.last_valid(),
        };
        let outcome = editor.apply(&self.map, &mut self.block_spam, Instant::now(), request);
        match outcome {
            Ok(EditOutcome::Applied { echo: Some(block) }) => {
                let echo = self.outgoing(ServerPacket::SetBlock {
                    x: request.x,
                    y: request.y,
                    z: request.z,
                    block,
                });
                self.writer.write_frame(&echo).await?;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(violation) => Err(self
                .kick_now(HACKING_DETECTED, violation.to_string())
                .await),
        }
    }

    /// Writes a kick immediately, bypassing the queues, and closes the link.
    async fn kick_now(&mut self, reason: &str, cause: impl Into<String>) -> SessionError {
        self.session.close_link();
        if let Err(e) = self
            .writer
            .send(&ServerPacket::Kick {
                reason: reason.to_string(),
            })
            .await
        {
            debug!("Could not deliver kick to {}: {}", self.session.name(), e);
        }
        SessionError::Kicked {
            reason: reason.to_string(),
            cause: cause.into(),
        }
    }

    /// Login-time kick: also marks the login as rejected.
    async fn reject_now(&mut self, reason: &str, cause: impl Into<String>) -> SessionError {
        let _ = self.session.advance(LoginState::Rejected);
        self.kick_now(reason, cause).await
    }

    async fn teardown(mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.session.close_link();
        self.server.players.unregister(&self.session);
        let _ = self.writer.shutdown().await;
        self.session.finish();
    }
}
