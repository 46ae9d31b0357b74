//! The per-connection session state machine.
//!
//! ```text
//!   Connected ──(first identity)──→ Active ──(disconnect)──→ Closed
//!       │                                                      ↑
//!       └──────────────────────(disconnect)────────────────────┘
//! ```
//!
//! - **Connected**: handshake passed, replication attached, no player yet.
//! - **Active**: the player entity exists; movement is accepted.
//! - **Closed**: terminal. If the session was Active, its entity has been
//!   marked dead and will decay out of the world.

use std::fmt;

use mazenet_protocol::{Direction, EntityId};
use mazenet_transport::{ConnectionId, Outbox};
use mazenet_world::{SubscriptionHandle, WorldHandle};

use crate::{ConnectionInfo, SessionError, SessionTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Active,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Active => write!(f, "Active"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// One connection's session. Owned by that connection's task.
#[derive(Debug)]
pub struct ConnectionSession {
    conn_id: ConnectionId,
    state: SessionState,
    /// Set once, by the first identity message.
    name: Option<String>,
    /// Set once, together with `name`.
    entity: Option<EntityId>,
    moves: u64,
    world: WorldHandle,
    subscription: Option<SubscriptionHandle>,
    table: SessionTable,
}

impl ConnectionSession {
    /// Creates the session, subscribes `outbox` to replication, and
    /// registers the connection in `table`.
    ///
    /// # Errors
    /// [`SessionError::World`] if the simulation is not running.
    pub fn open(
        world: WorldHandle,
        outbox: Outbox,
        table: SessionTable,
    ) -> Result<Self, SessionError> {
        let conn_id = outbox.conn_id();
        let subscription = world.attach(outbox)?;
        let session = Self {
            conn_id,
            state: SessionState::Connected,
            name: None,
            entity: None,
            moves: 0,
            world,
            subscription: Some(subscription),
            table,
        };
        session.publish();
        tracing::debug!(%conn_id, "session opened");
        Ok(session)
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    pub fn moves(&self) -> u64 {
        self.moves
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.conn_id,
            state: self.state,
            name: self.name.clone(),
            entity: self.entity,
            moves: self.moves,
        }
    }

    fn publish(&self) {
        self.table.upsert(self.info());
    }

    /// Handles the identity message: allocates and spawns the player.
    ///
    /// # Errors
    /// - [`SessionError::AlreadyIdentified`] on any identity after the first.
    /// - [`SessionError::EmptyName`] for a blank name; the session stays
    ///   Connected and may identify again.
    /// - [`SessionError::Closed`] once closed.
    pub fn announce(&mut self, name: &str) -> Result<EntityId, SessionError> {
        match self.state {
            SessionState::Closed => return Err(SessionError::Closed),
            SessionState::Active => return Err(SessionError::AlreadyIdentified),
            SessionState::Connected => {}
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::EmptyName);
        }

        let entity = self.world.allocate();
        self.world.spawn_player(entity, name)?;

        self.name = Some(name.to_owned());
        self.entity = Some(entity);
        self.state = SessionState::Active;
        self.publish();

        tracing::info!(conn_id = %self.conn_id, %entity, %name, "player identified");
        Ok(entity)
    }

    /// Forwards one move intent to the simulation.
    ///
    /// # Errors
    /// [`SessionError::NotActive`] before identity, [`SessionError::Closed`]
    /// after close.
    pub fn request_move(&mut self, direction: Direction) -> Result<(), SessionError> {
        let entity = match (self.state, self.entity) {
            (SessionState::Active, Some(entity)) => entity,
            (SessionState::Closed, _) => return Err(SessionError::Closed),
            _ => return Err(SessionError::NotActive),
        };
        self.world.move_entity(entity, direction)?;
        self.moves += 1;
        self.publish();
        Ok(())
    }

    /// Tears the session down. `now` is the server time of death.
    ///
    /// Returns `false` if the session was already closed.
    pub fn close(&mut self, now: u64) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        if let (SessionState::Active, Some(entity)) = (self.state, self.entity) {
            if let Err(e) = self.world.mark_dead(entity, now) {
                tracing::debug!(conn_id = %self.conn_id, error = %e, "could not mark entity dead");
            }
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.detach();
        }
        self.state = SessionState::Closed;
        self.table.remove(self.conn_id);

        tracing::info!(
            conn_id = %self.conn_id,
            entity = ?self.entity,
            moves = self.moves,
            "session closed"
        );
        true
    }
}

/// Closes a session that was never closed explicitly, e.g. when its
/// connection task panicked. The time of death is read from the world clock.
impl Drop for ConnectionSession {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            tracing::warn!(conn_id = %self.conn_id, "session dropped without close");
            let now = self.world.clock().now_millis();
            self.close(now);
        }
    }
}
