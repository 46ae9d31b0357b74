//! Per-connection handler: handshake, session, and message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   0. Finish the WebSocket upgrade within the handshake timeout
//!   1. Receive Handshake → validate version, or reject and close
//!   2. Send HandshakeAccepted, start the writer, open the session
//!   3. Loop: receive envelopes → dispatch to the typed handlers
//!   4. On disconnect or shutdown: close the session, drop the writer

use std::sync::Arc;

use mazenet_protocol::{
    ClockPing, Dispatcher, EntityAssigned, Handshake, HandshakeAccepted,
    HandshakeRejected, IdentityAnnounce, MapData, MonotonicClock, MoveIntent,
    PROTOCOL_VERSION, Protocol, ProtocolError, ServerTime, WireType,
};
use mazenet_session::ConnectionSession;
use mazenet_transport::{
    Connection, Outbox, PendingConnection, ServerConnection, Upgrade, spawn_writer,
};
use tokio::sync::watch;

use crate::MazenetError;
use crate::server::ServerState;

/// Per-connection state the message handlers work on.
pub(crate) struct ConnectionContext {
    session: ConnectionSession,
    outbox: Outbox,
    protocol: Arc<Protocol>,
    map: Arc<MapData>,
    clock: MonotonicClock,
    seq: u64,
}

impl ConnectionContext {
    /// Queues a control message. A closed outbox means the connection is
    /// going away; the message is dropped.
    fn send<T: WireType>(&mut self, message: &T) {
        self.seq += 1;
        let frame = match self.protocol.frame(self.seq, message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(conn_id = %self.session.conn_id(), error = %e, "encode failed");
                return;
            }
        };
        if self.outbox.push(frame).is_err() {
            tracing::debug!(conn_id = %self.session.conn_id(), msg = T::NAME, "outbox closed, message dropped");
        }
    }
}

/// Builds the server's handler table. Shared by every connection.
pub(crate) fn server_dispatcher(
    protocol: &Protocol,
) -> Result<Dispatcher<ConnectionContext>, ProtocolError> {
    let mut dispatcher = Dispatcher::new(Arc::clone(protocol.registry()));

    dispatcher.register_handler(|ctx: &mut ConnectionContext, msg: IdentityAnnounce| {
        match ctx.session.announce(&msg.name) {
            Ok(entity) => {
                let map = Arc::clone(&ctx.map);
                ctx.send(&EntityAssigned { entity });
                ctx.send(&ServerTime {
                    server_time: ctx.clock.now_millis(),
                });
                ctx.send(map.as_ref());
            }
            Err(e) => {
                tracing::debug!(conn_id = %ctx.session.conn_id(), error = %e, "identity ignored");
            }
        }
    })?;

    dispatcher.register_handler(|ctx: &mut ConnectionContext, msg: MoveIntent| {
        if let Err(e) = ctx.session.request_move(msg.direction) {
            tracing::debug!(conn_id = %ctx.session.conn_id(), error = %e, "move ignored");
        }
    })?;

    dispatcher.register_handler(|ctx: &mut ConnectionContext, msg: ClockPing| {
        let reply = ClockPing {
            sent_time: msg.sent_time,
            observed_time: ctx.clock.now_millis(),
        };
        ctx.send(&reply);
    })?;

    dispatcher.register_handler(|ctx: &mut ConnectionContext, _: Handshake| {
        tracing::debug!(conn_id = %ctx.session.conn_id(), "repeated handshake ignored");
    })?;

    Ok(dispatcher)
}

/// Resolves once shutdown has been requested (or the server is gone).
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    pending: PendingConnection,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), MazenetError> {
    let peer = pending.peer_addr();
    let conn = tokio::select! {
        upgraded = tokio::time::timeout(state.handshake_timeout, pending.upgrade()) => match upgraded {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(MazenetError::Handshake(format!("websocket upgrade from {peer} timed out")));
            }
        },
        _ = stopped(&mut shutdown) => return Ok(()),
    };
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = ?conn.peer_addr(), "handling new connection");

    // --- Step 1: Handshake ---
    if let Err(e) = perform_handshake(&conn, &state).await {
        if let Err(close_err) = conn.close_stream().await {
            tracing::trace!(%conn_id, error = %close_err, "close after failed handshake");
        }
        return Err(e);
    }
    tracing::info!(%conn_id, "client connected");

    // --- Step 2: Session ---
    let conn = Arc::new(conn);
    let (outbox, writer) = spawn_writer(Arc::clone(&conn), conn_id);
    let session = ConnectionSession::open(state.world.clone(), outbox.clone(), state.sessions.clone())?;
    let mut ctx = ConnectionContext {
        session,
        outbox,
        protocol: Arc::clone(&state.protocol),
        map: Arc::clone(state.world.map()),
        clock: state.clock,
        seq: 1,
    };

    // --- Step 3: Message loop ---
    loop {
        tokio::select! {
            received = conn.recv_bytes() => match received {
                Ok(Some(bytes)) => route(&state, &mut ctx, &bytes),
                Ok(None) => {
                    tracing::info!(%conn_id, "connection closed cleanly");
                    break;
                }
                Err(e) => {
                    tracing::info!(%conn_id, error = %e, "connection lost");
                    break;
                }
            },
            _ = stopped(&mut shutdown) => {
                tracing::debug!(%conn_id, "closing for shutdown");
                break;
            }
        }
    }

    // --- Step 4: Teardown ---
    ctx.session.close(state.clock.now_millis());
    writer.abort();
    drop(ctx);
    if let Err(e) = conn.close_stream().await {
        tracing::trace!(%conn_id, error = %e, "close after disconnect");
    }
    Ok(())
}

/// Decodes one inbound frame and runs its handler. Protocol errors drop
/// the message and keep the connection.
fn route(state: &ServerState, ctx: &mut ConnectionContext, bytes: &[u8]) {
    let conn_id = ctx.session.conn_id();
    let envelope = match state.protocol.open(bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(%conn_id, error = %e, "failed to decode envelope");
            return;
        }
    };
    if let Err(e) = state.dispatcher.dispatch_envelope(ctx, &envelope) {
        tracing::debug!(%conn_id, seq = envelope.seq, tag = %envelope.tag, error = %e, "message dropped");
    }
}

/// Receives the Handshake, checks the version, and answers it.
async fn perform_handshake(
    conn: &ServerConnection,
    state: &ServerState,
) -> Result<(), MazenetError> {
    let data = match tokio::time::timeout(state.handshake_timeout, conn.recv_bytes()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(MazenetError::Handshake("connection closed before handshake".into()));
        }
        Ok(Err(e)) => return Err(MazenetError::Transport(e)),
        Err(_) => return Err(MazenetError::Handshake("handshake timed out".into())),
    };

    let handshake = match state.protocol.open_as::<Handshake>(&data) {
        Ok(handshake) => handshake,
        Err(e) => {
            reject(conn, state, "expected Handshake").await?;
            return Err(e.into());
        }
    };

    if handshake.version != PROTOCOL_VERSION {
        tracing::warn!(
            conn_id = %conn.id(),
            expected = PROTOCOL_VERSION,
            got = handshake.version,
            "handshake refused"
        );
        reject(
            conn,
            state,
            &format!("version mismatch: expected {PROTOCOL_VERSION}, got {}", handshake.version),
        )
        .await?;
        return Err(MazenetError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            got: handshake.version,
        });
    }

    let accepted = HandshakeAccepted {
        connection: conn.id().into_inner(),
    };
    let frame = state.protocol.frame(1, &accepted)?;
    conn.send_bytes(&frame.bytes).await?;
    Ok(())
}

/// Sends a HandshakeRejected straight to the socket.
async fn reject(
    conn: &ServerConnection,
    state: &ServerState,
    reason: &str,
) -> Result<(), MazenetError> {
    let frame = state.protocol.frame(
        0,
        &HandshakeRejected {
            reason: reason.to_string(),
        },
    )?;
    conn.send_bytes(&frame.bytes).await?;
    Ok(())
}
