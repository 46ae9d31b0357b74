//! The simulation actor: single writer of the [`World`].
//!
//! Connection tasks never touch the world. They hold a [`WorldHandle`] and
//! enqueue [`SimCommand`]s; once per tick the actor drains the queue in
//! arrival order, applies every command, removes decayed corpses, and
//! publishes the tick's replication batches.

use std::sync::Arc;

use mazenet_protocol::{
    ComponentSet, Dead, Direction, DisplayName, EntityId, Health, MapData,
    MonotonicClock, Position, Protocol,
};
use mazenet_tick::TickScheduler;
use mazenet_transport::{ConnectionId, Outbox};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::replication::ReplicationHub;
use crate::{EntityAllocator, World, WorldConfig, WorldError};

/// Commands accepted by the simulation actor.
#[derive(Debug)]
pub enum SimCommand {
    /// Create a player entity at the spawn point.
    Spawn { entity: EntityId, name: String },
    /// Step one cell.
    Move {
        entity: EntityId,
        direction: Direction,
    },
    /// Attach `Dead` once; the entity is removed after the corpse decays.
    MarkDead { entity: EntityId, at: u64 },
    /// Start replicating to a connection.
    Attach { outbox: Outbox },
    /// Stop replicating to a connection.
    Detach { conn_id: ConnectionId },
    /// Read one entity's components.
    Inspect {
        entity: EntityId,
        reply: oneshot::Sender<Option<ComponentSet>>,
    },
    /// Read world counters.
    Stats { reply: oneshot::Sender<WorldStats> },
    /// Stop the actor.
    Shutdown,
}

/// World counters, as of the tick that answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldStats {
    pub tick: u64,
    pub entities: usize,
    pub subscribers: usize,
    pub allocated: u64,
}

/// Cheap, cloneable access to a running simulation.
#[derive(Debug, Clone)]
pub struct WorldHandle {
    allocator: Arc<EntityAllocator>,
    map: Arc<MapData>,
    clock: MonotonicClock,
    commands: mpsc::UnboundedSender<SimCommand>,
}

impl WorldHandle {
    /// The server clock the simulation stamps batches with.
    pub fn clock(&self) -> MonotonicClock {
        self.clock
    }

    /// Reserves a fresh entity id. Does not spawn anything.
    pub fn allocate(&self) -> EntityId {
        self.allocator.allocate()
    }

    pub fn map(&self) -> &Arc<MapData> {
        &self.map
    }

    fn send(&self, cmd: SimCommand) -> Result<(), WorldError> {
        self.commands.send(cmd).map_err(|_| WorldError::Unavailable)
    }

    pub fn spawn_player(
        &self,
        entity: EntityId,
        name: impl Into<String>,
    ) -> Result<(), WorldError> {
        self.send(SimCommand::Spawn {
            entity,
            name: name.into(),
        })
    }

    pub fn move_entity(
        &self,
        entity: EntityId,
        direction: Direction,
    ) -> Result<(), WorldError> {
        self.send(SimCommand::Move { entity, direction })
    }

    pub fn mark_dead(&self, entity: EntityId, at: u64) -> Result<(), WorldError> {
        self.send(SimCommand::MarkDead { entity, at })
    }

    /// Subscribes a connection to replication. The subscription ends when
    /// the returned handle is dropped or detached.
    pub fn attach(&self, outbox: Outbox) -> Result<SubscriptionHandle, WorldError> {
        let conn_id = outbox.conn_id();
        self.send(SimCommand::Attach { outbox })?;
        Ok(SubscriptionHandle {
            conn_id,
            commands: self.commands.clone(),
            attached: true,
        })
    }

    pub async fn inspect(
        &self,
        entity: EntityId,
    ) -> Result<Option<ComponentSet>, WorldError> {
        let (reply, rx) = oneshot::channel();
        self.send(SimCommand::Inspect { entity, reply })?;
        rx.await.map_err(|_| WorldError::Unavailable)
    }

    pub async fn stats(&self) -> Result<WorldStats, WorldError> {
        let (reply, rx) = oneshot::channel();
        self.send(SimCommand::Stats { reply })?;
        rx.await.map_err(|_| WorldError::Unavailable)
    }

    pub fn shutdown(&self) -> Result<(), WorldError> {
        self.send(SimCommand::Shutdown)
    }
}

/// A live replication subscription.
#[derive(Debug)]
pub struct SubscriptionHandle {
    conn_id: ConnectionId,
    commands: mpsc::UnboundedSender<SimCommand>,
    attached: bool,
}

impl SubscriptionHandle {
    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Unsubscribes now. Equivalent to dropping the handle.
    pub fn detach(mut self) {
        self.send_detach();
    }

    fn send_detach(&mut self) {
        if std::mem::take(&mut self.attached) {
            // The actor may already be gone; nothing left to detach from then.
            let _ = self.commands.send(SimCommand::Detach {
                conn_id: self.conn_id,
            });
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.send_detach();
    }
}

struct Simulation {
    world: World,
    hub: ReplicationHub,
    config: WorldConfig,
    map: Arc<MapData>,
    spawn_point: Option<Position>,
    allocator: Arc<EntityAllocator>,
    protocol: Arc<Protocol>,
    clock: MonotonicClock,
    commands: mpsc::UnboundedReceiver<SimCommand>,
    tick: u64,
}

impl Simulation {
    async fn run(mut self) {
        tracing::info!(
            rate_hz = self.config.tick.tick_rate_hz,
            width = self.map.width,
            height = self.map.height,
            "simulation started"
        );
        let mut scheduler = TickScheduler::new(self.config.tick.clone());

        loop {
            let info = scheduler.wait_for_tick().await;
            let running = self.step(info.tick);
            scheduler.record_tick_end();
            if !running {
                break;
            }
        }

        tracing::info!(tick = self.tick, "simulation stopped");
    }

    /// Runs one tick. Returns `false` once the actor should stop.
    fn step(&mut self, tick: u64) -> bool {
        self.tick = tick;

        loop {
            match self.commands.try_recv() {
                Ok(SimCommand::Shutdown) => return false,
                Ok(cmd) => self.apply(cmd),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }

        self.decay_corpses();

        let changes = self.world.take_changes();
        let server_time = self.clock.now_millis();
        if let Err(e) =
            self.hub
                .publish(&self.world, &self.protocol, tick, server_time, changes)
        {
            tracing::warn!(tick, error = %e, "replication batch dropped");
        }
        true
    }

    fn apply(&mut self, cmd: SimCommand) {
        match cmd {
            SimCommand::Spawn { entity, name } => self.spawn(entity, name),
            SimCommand::Move { entity, direction } => {
                self.move_entity(entity, direction)
            }
            SimCommand::MarkDead { entity, at } => self.mark_dead(entity, at),
            SimCommand::Attach { outbox } => self.hub.attach(outbox),
            SimCommand::Detach { conn_id } => {
                self.hub.detach(conn_id);
            }
            SimCommand::Inspect { entity, reply } => {
                let _ = reply.send(self.world.components(entity).cloned());
            }
            SimCommand::Stats { reply } => {
                let _ = reply.send(WorldStats {
                    tick: self.tick,
                    entities: self.world.len(),
                    subscribers: self.hub.len(),
                    allocated: self.allocator.allocated(),
                });
            }
            SimCommand::Shutdown => {}
        }
    }

    fn spawn(&mut self, entity: EntityId, name: String) {
        let mut components = ComponentSet::new();
        components.insert(DisplayName { name: name.clone() });
        components.insert(Health::full(self.config.player_health));
        match self.spawn_point {
            Some(position) => components.insert(position),
            None => tracing::warn!(%entity, "map has no floor, spawning without a position"),
        }

        match self.world.spawn(entity, components) {
            Ok(()) => tracing::info!(%entity, %name, "player spawned"),
            Err(e) => tracing::warn!(%entity, error = %e, "spawn refused"),
        }
    }

    fn move_entity(&mut self, entity: EntityId, direction: Direction) {
        let Some(components) = self.world.components(entity) else {
            tracing::debug!(%entity, "move for unknown entity ignored");
            return;
        };
        if components.contains::<Dead>() {
            tracing::debug!(%entity, "move for dead entity ignored");
            return;
        }
        let Some(from) = components.get::<Position>().copied() else {
            return;
        };

        let to = from.step(direction);
        if !self.map.is_floor(to.x, to.y) {
            tracing::trace!(%entity, %direction, "move blocked");
            return;
        }
        if let Err(e) = self.world.insert(entity, to) {
            tracing::warn!(%entity, error = %e, "move failed");
        }
    }

    fn mark_dead(&mut self, entity: EntityId, at: u64) {
        match self.world.get::<Dead>(entity) {
            Some(_) => {
                tracing::debug!(%entity, "already dead");
            }
            None => match self.world.insert(entity, Dead { died_at: at }) {
                Ok(()) => tracing::info!(%entity, died_at = at, "entity marked dead"),
                Err(e) => tracing::debug!(%entity, error = %e, "mark dead ignored"),
            },
        }
    }

    fn decay_corpses(&mut self) {
        let now = self.clock.now_millis();
        let decay = self.config.corpse_decay.as_millis() as u64;
        let expired: Vec<EntityId> = self
            .world
            .with::<Dead>()
            .filter(|(_, dead)| now.saturating_sub(dead.died_at) >= decay)
            .map(|(id, _)| id)
            .collect();

        for entity in expired {
            self.world.despawn(entity);
            tracing::info!(%entity, "corpse removed");
        }
    }
}

/// Starts the simulation actor.
///
/// `clock` must be the server clock: batch timestamps and corpse decay are
/// read from it.
pub fn spawn_world(
    config: WorldConfig,
    protocol: Arc<Protocol>,
    clock: MonotonicClock,
) -> (WorldHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let map = Arc::new(config.map.clone());
    let allocator = Arc::new(EntityAllocator::new());

    let spawn_point = map
        .nearest_floor(map.width as i32 / 2, map.height as i32 / 2)
        .map(|(x, y)| Position { x, y });

    let sim = Simulation {
        world: World::new(),
        hub: ReplicationHub::default(),
        config,
        map: Arc::clone(&map),
        spawn_point,
        allocator: Arc::clone(&allocator),
        protocol,
        clock,
        commands: rx,
        tick: 0,
    };
    let task = tokio::spawn(sim.run());

    (
        WorldHandle {
            allocator,
            map,
            clock,
            commands: tx,
        },
        task,
    )
}
