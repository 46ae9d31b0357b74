//! [`GameClient`]: connection, handshake and the client actor.
//!
//! One actor task owns the socket, the clock synchronizer, the move
//! limiter and the replica store. The `GameClient` handle talks to it
//! through a command channel and reads its state through `watch`
//! channels, so accessors never wait on the network.

use std::sync::Arc;

use mazenet_protocol::{
    ClockPing, Direction, Dispatcher, EntityAssigned, EntityId, Handshake,
    HandshakeAccepted, HandshakeRejected, IdentityAnnounce, MapData,
    MonotonicClock, MoveIntent, PROTOCOL_VERSION, Protocol, ProtocolError,
    ReplicationBatch, ServerTime, WireType,
};
use mazenet_transport::{ClientConnection, Connection, ConnectionId};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{
    ClientConfig, ClientError, ClockSynchronizer, MoveLimiter, ReplicaChange,
    ReplicaStore, ReplicaView, Snapshot,
};

/// State published by the client actor.
#[derive(Debug, Clone, Default)]
pub struct ClientStatus {
    /// The player entity, once the server assigned it.
    pub entity: Option<EntityId>,
    pub map: Option<Arc<MapData>>,
    /// Clock offset (`local - server`), once synced.
    pub offset: Option<i64>,
    /// Set if the server refused the session after the handshake.
    pub rejected: Option<String>,
    pub connected: bool,
}

enum ClientCommand {
    Move {
        direction: Direction,
        reply: oneshot::Sender<bool>,
    },
    Close,
}

/// Handle to a connected client.
pub struct GameClient {
    conn_id: ConnectionId,
    local: MonotonicClock,
    render_lead_ms: i64,
    commands: mpsc::UnboundedSender<ClientCommand>,
    status: watch::Receiver<ClientStatus>,
    replica: ReplicaView,
    task: JoinHandle<()>,
}

impl GameClient {
    /// Connects to `addr`, performs the version handshake and announces
    /// `name`.
    ///
    /// # Errors
    /// - [`ClientError::Transport`] if the server can't be reached.
    /// - [`ClientError::Rejected`] if the server refuses the handshake.
    /// - [`ClientError::HandshakeTimeout`] if it doesn't answer in
    ///   `config.handshake_timeout`.
    pub async fn connect(
        addr: &str,
        name: &str,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let protocol = Arc::new(Protocol::standard()?);
        let conn = Arc::new(mazenet_transport::connect(addr).await?);
        let conn_id = conn.id();

        let mut seq = 0u64;
        send(&conn, &protocol, &mut seq, &Handshake { version: PROTOCOL_VERSION }).await?;

        let accepted = tokio::time::timeout(
            config.handshake_timeout,
            await_handshake(&conn, &protocol),
        )
        .await
        .map_err(|_| ClientError::HandshakeTimeout)??;
        tracing::debug!(%conn_id, server_conn = accepted.connection, "handshake accepted");

        send(&conn, &protocol, &mut seq, &IdentityAnnounce { name: name.to_owned() }).await?;

        let local = MonotonicClock::new();
        let (status_tx, status) = watch::channel(ClientStatus {
            connected: true,
            ..ClientStatus::default()
        });
        let replica = ReplicaStore::new(protocol.registry().clone());
        let view = replica.view();
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let actor = ClientActor {
            conn,
            protocol: protocol.clone(),
            dispatcher: client_dispatcher(&protocol)?,
            ctx: ClientContext {
                local,
                clock: ClockSynchronizer::new(config.clock),
                replica,
                status: status_tx,
                stop: false,
            },
            limiter: MoveLimiter::new(config.move_interval),
            seq,
        };
        let task = tokio::spawn(actor.run(commands_rx, config.tick_interval));

        tracing::info!(%conn_id, %name, "connected");
        Ok(Self {
            conn_id,
            local,
            render_lead_ms: config.clock.render_lead_ms,
            commands,
            status,
            replica: view,
            task,
        })
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    pub fn entity(&self) -> Option<EntityId> {
        self.status.borrow().entity
    }

    /// Waits for the server to assign the player entity.
    ///
    /// # Errors
    /// [`ClientError::Closed`] if the client stops first.
    pub async fn wait_for_entity(&self) -> Result<EntityId, ClientError> {
        let status = self.wait_for(|s| s.entity.is_some()).await?;
        status.entity.ok_or(ClientError::Closed)
    }

    pub fn map(&self) -> Option<Arc<MapData>> {
        self.status.borrow().map.clone()
    }

    pub async fn wait_for_map(&self) -> Result<Arc<MapData>, ClientError> {
        let status = self.wait_for(|s| s.map.is_some()).await?;
        status.map.ok_or(ClientError::Closed)
    }

    /// Waits until the clock has an offset.
    pub async fn wait_for_sync(&self) -> Result<(), ClientError> {
        self.wait_for(|s| s.offset.is_some()).await.map(|_| ())
    }

    async fn wait_for(
        &self,
        ready: impl Fn(&ClientStatus) -> bool,
    ) -> Result<ClientStatus, ClientError> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|s| ready(s) || !s.connected)
            .await
            .map_err(|_| ClientError::Closed)?
            .clone();
        if ready(&status) {
            Ok(status)
        } else {
            Err(match status.rejected {
                Some(reason) => ClientError::Rejected(reason),
                None => ClientError::Closed,
            })
        }
    }

    /// Estimated server time now, in milliseconds.
    pub fn server_time(&self) -> Option<i64> {
        let offset = self.status.borrow().offset?;
        Some(self.local.now_millis() as i64 - offset)
    }

    /// Server time minus the render lead.
    pub fn render_time(&self) -> Option<i64> {
        self.server_time().map(|t| t - self.render_lead_ms)
    }

    /// The latest fully applied replica.
    pub fn snapshot(&self) -> Snapshot {
        self.replica.snapshot()
    }

    pub fn replica(&self) -> ReplicaView {
        self.replica.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaChange> {
        self.replica.subscribe()
    }

    /// Sends a move intent unless the limiter holds it back.
    ///
    /// Returns whether the intent was sent.
    ///
    /// # Errors
    /// [`ClientError::Closed`] once the client has stopped.
    pub async fn move_towards(&self, direction: Direction) -> Result<bool, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ClientCommand::Move { direction, reply })
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Closes the connection and waits for the actor to finish.
    pub async fn close(self) {
        let _ = self.commands.send(ClientCommand::Close);
        if let Err(e) = self.task.await {
            tracing::debug!(conn_id = %self.conn_id, error = %e, "client task failed");
        }
    }
}

impl std::fmt::Debug for GameClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameClient")
            .field("conn_id", &self.conn_id)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

/// What the dispatcher's handlers can touch.
struct ClientContext {
    local: MonotonicClock,
    clock: ClockSynchronizer,
    replica: ReplicaStore,
    status: watch::Sender<ClientStatus>,
    stop: bool,
}

impl ClientContext {
    fn publish_offset(&self) {
        let offset = self.clock.offset();
        self.status.send_if_modified(|s| {
            let changed = s.offset != offset;
            s.offset = offset;
            changed
        });
    }
}

fn client_dispatcher(
    protocol: &Protocol,
) -> Result<Dispatcher<ClientContext>, ProtocolError> {
    let mut dispatcher = Dispatcher::new(protocol.registry().clone());

    dispatcher.register_handler(|ctx: &mut ClientContext, msg: EntityAssigned| {
        tracing::debug!(entity = %msg.entity, "entity assigned");
        ctx.status.send_modify(|s| s.entity = Some(msg.entity));
    })?;

    dispatcher.register_handler(|ctx: &mut ClientContext, msg: ServerTime| {
        let now = ctx.local.now_millis();
        if ctx.clock.on_server_time(now, msg.server_time) {
            ctx.publish_offset();
        }
    })?;

    dispatcher.register_handler(|ctx: &mut ClientContext, msg: ClockPing| {
        let now = ctx.local.now_millis();
        if ctx.clock.on_clock_reply(now, &msg) {
            ctx.publish_offset();
        }
    })?;

    dispatcher.register_handler(|ctx: &mut ClientContext, msg: MapData| {
        if !msg.is_consistent() {
            tracing::debug!(width = msg.width, height = msg.height, "inconsistent map dropped");
            return;
        }
        ctx.status.send_modify(|s| s.map = Some(Arc::new(msg)));
    })?;

    dispatcher.register_handler(|ctx: &mut ClientContext, batch: ReplicationBatch| {
        if let Err(e) = ctx.replica.apply(&batch) {
            tracing::debug!(tick = batch.tick, error = %e, "replication batch dropped");
        }
    })?;

    dispatcher.register_handler(|ctx: &mut ClientContext, msg: HandshakeRejected| {
        tracing::warn!(reason = %msg.reason, "server closed the session");
        ctx.status.send_modify(|s| s.rejected = Some(msg.reason));
        ctx.stop = true;
    })?;

    Ok(dispatcher)
}

struct ClientActor {
    conn: Arc<ClientConnection>,
    protocol: Arc<Protocol>,
    dispatcher: Dispatcher<ClientContext>,
    ctx: ClientContext,
    limiter: MoveLimiter,
    seq: u64,
}

impl ClientActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ClientCommand>,
        tick_interval: std::time::Duration,
    ) {
        let conn_id = self.conn.id();
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                received = self.conn.recv_bytes() => {
                    match received {
                        Ok(Some(bytes)) => self.on_frame(&bytes),
                        Ok(None) => {
                            tracing::info!(%conn_id, "server closed the connection");
                            break;
                        }
                        Err(e) => {
                            tracing::debug!(%conn_id, error = %e, "recv error");
                            break;
                        }
                    }
                    if self.ctx.stop {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let now = self.ctx.local.now_millis();
                    if let Some(ping) = self.ctx.clock.on_tick(now) {
                        if let Err(e) = self.send(&ping).await {
                            tracing::debug!(%conn_id, error = %e, "ping send failed");
                            break;
                        }
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(ClientCommand::Move { direction, reply }) => {
                            let now = self.ctx.local.now_millis();
                            let allowed = self.limiter.try_move(direction, now);
                            if allowed {
                                if let Err(e) = self.send(&MoveIntent { direction }).await {
                                    tracing::debug!(%conn_id, error = %e, "move send failed");
                                    let _ = reply.send(false);
                                    break;
                                }
                            }
                            let _ = reply.send(allowed);
                        }
                        Some(ClientCommand::Close) | None => break,
                    }
                }
            }
        }

        if let Err(e) = self.conn.close_stream().await {
            tracing::trace!(%conn_id, error = %e, "close after disconnect");
        }
        self.ctx.status.send_modify(|s| s.connected = false);
        tracing::info!(%conn_id, "client stopped");
    }

    fn on_frame(&mut self, bytes: &[u8]) {
        let envelope = match self.protocol.open(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "undecodable frame dropped");
                return;
            }
        };
        if let Err(e) = self.dispatcher.dispatch_envelope(&mut self.ctx, &envelope) {
            tracing::debug!(tag = %envelope.tag, error = %e, "message dropped");
        }
    }

    async fn send<T: WireType>(&mut self, message: &T) -> Result<(), ClientError> {
        send(&self.conn, &self.protocol, &mut self.seq, message).await
    }
}

async fn send<T: WireType>(
    conn: &ClientConnection,
    protocol: &Protocol,
    seq: &mut u64,
    message: &T,
) -> Result<(), ClientError> {
    *seq += 1;
    let frame = protocol.frame(*seq, message)?;
    conn.send_bytes(&frame.bytes).await?;
    Ok(())
}

/// Reads frames until the server answers the handshake.
async fn await_handshake(
    conn: &ClientConnection,
    protocol: &Protocol,
) -> Result<HandshakeAccepted, ClientError> {
    loop {
        let bytes = conn.recv_bytes().await?.ok_or(ClientError::Closed)?;
        let envelope = protocol.open(&bytes)?;
        if envelope.tag == HandshakeAccepted::TAG {
            return Ok(protocol.registry().decode_as(&envelope.body)?);
        }
        if envelope.tag == HandshakeRejected::TAG {
            let rejected: HandshakeRejected = protocol.registry().decode_as(&envelope.body)?;
            return Err(ClientError::Rejected(rejected.reason));
        }
        tracing::debug!(tag = %envelope.tag, "message before handshake ignored");
    }
}
