//! `MazenetServer` builder and server loop.
//!
//! This is the entry point for running a mazenet server. It ties together
//! all the layers: transport → protocol → session → world.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mazenet_protocol::{Dispatcher, MapData, MonotonicClock, Protocol};
use mazenet_session::{ConnectionInfo, SessionTable};
use mazenet_transport::{Transport, WebSocketTransport};
use mazenet_world::{WorldHandle, spawn_world};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::handler::{ConnectionContext, handle_connection, server_dispatcher, stopped};
use crate::{MazenetError, ServerConfig};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState {
    pub(crate) protocol: Arc<Protocol>,
    pub(crate) dispatcher: Dispatcher<ConnectionContext>,
    pub(crate) world: WorldHandle,
    pub(crate) sessions: SessionTable,
    pub(crate) clock: MonotonicClock,
    pub(crate) handshake_timeout: Duration,
}

/// Builder for configuring and starting a mazenet server.
///
/// # Example
///
/// ```rust,no_run
/// use mazenet::MazenetServer;
///
/// # async fn run() -> Result<(), mazenet::MazenetError> {
/// let server = MazenetServer::builder()
///     .bind("127.0.0.1")
///     .port(7777)
///     .map_size(40, 30)
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MazenetServerBuilder {
    config: ServerConfig,
    map: Option<MapData>,
}

impl MazenetServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every setting with `config`.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the interface to bind to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    /// Sets the listen port. `0` picks a free one.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn tick_rate(mut self, hz: u32) -> Self {
        self.config.tick_rate = hz;
        self
    }

    /// Sets the size of the built-in walled map.
    pub fn map_size(mut self, width: u32, height: u32) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    /// Uses `map` instead of the built-in one. Overrides `map_size`.
    pub fn map(mut self, map: MapData) -> Self {
        self.map = Some(map);
        self
    }

    pub fn corpse_decay(mut self, decay: Duration) -> Self {
        self.config.corpse_decay_ms = decay.as_millis() as u64;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builds the registry, starts the simulation and binds the listener.
    ///
    /// # Errors
    /// - [`MazenetError::InvalidConfig`] for an unusable map or timeout.
    /// - [`MazenetError::Registry`] if the type registry is inconsistent.
    /// - [`MazenetError::Transport`] if the address can't be bound.
    pub async fn build(self) -> Result<MazenetServer, MazenetError> {
        let mut config = self.config;
        if let Some(map) = &self.map {
            config.width = map.width;
            config.height = map.height;
        }
        config.validate()?;

        let world_config = match self.map {
            Some(map) if !map.is_consistent() || map.nearest_floor(0, 0).is_none() => {
                return Err(MazenetError::InvalidConfig(
                    "map needs width * height cells and at least one floor".into(),
                ));
            }
            Some(map) => config.world_config().with_map(map),
            None => config.world_config(),
        };

        let protocol = Arc::new(Protocol::standard()?);
        let dispatcher = server_dispatcher(&protocol)?;

        let transport = WebSocketTransport::bind(&config.addr()).await?;
        let local_addr = transport.local_addr()?;

        let clock = MonotonicClock::new();
        let (world, world_task) = spawn_world(world_config, Arc::clone(&protocol), clock);

        let state = Arc::new(ServerState {
            protocol,
            dispatcher,
            world,
            sessions: SessionTable::new(),
            clock,
            handshake_timeout: config.handshake_timeout(),
        });
        let (shutdown, _) = watch::channel(false);

        Ok(MazenetServer {
            transport,
            local_addr,
            state,
            world_task,
            shutdown: Arc::new(shutdown),
        })
    }
}

/// A bound mazenet server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct MazenetServer {
    transport: WebSocketTransport,
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    world_task: JoinHandle<()>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl MazenetServer {
    /// Creates a new builder.
    pub fn builder() -> MazenetServerBuilder {
        MazenetServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle for inspecting and stopping the server from elsewhere.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            local_addr: self.local_addr,
            sessions: self.state.sessions.clone(),
            world: self.state.world.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Runs the accept loop until [`ServerHandle::shutdown`] is called.
    ///
    /// Each accepted connection gets its own task. On shutdown the loop
    /// stops accepting, every connection task closes its socket, and the
    /// simulation stops.
    pub async fn run(mut self) -> Result<(), MazenetError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut connections = JoinSet::new();
        tracing::info!(addr = %self.local_addr, "mazenet server running");

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(pending) => {
                        let state = Arc::clone(&self.state);
                        let shutdown = self.shutdown.subscribe();
                        connections.spawn(async move {
                            let peer = pending.peer_addr();
                            if let Err(e) = handle_connection(pending, state, shutdown).await {
                                tracing::debug!(%peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!(error = %e, "connection task panicked");
                    }
                }
                _ = stopped(&mut shutdown) => break,
            }
        }

        tracing::info!(open = connections.len(), "shutting down");
        while connections.join_next().await.is_some() {}

        if let Err(e) = self.state.world.shutdown() {
            tracing::debug!(error = %e, "simulation already stopped");
        }
        if let Err(e) = self.transport.shutdown().await {
            tracing::debug!(error = %e, "transport shutdown failed");
        }
        if let Err(e) = self.world_task.await {
            tracing::warn!(error = %e, "simulation task failed");
        }
        tracing::info!("mazenet server stopped");
        Ok(())
    }
}

/// Cloneable control handle for a running server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    sessions: SessionTable,
    world: WorldHandle,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Every live connection, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.sessions.list()
    }

    pub fn world(&self) -> &WorldHandle {
        &self.world
    }

    /// Asks the server to stop. Returns immediately.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
