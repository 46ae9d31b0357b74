//! The client's local copy of the replicated world.
//!
//! Batches are applied atomically: every component in a batch is decoded
//! before anything changes, and the new state is published as one
//! immutable snapshot. Readers holding an older snapshot keep seeing a
//! consistent world; nobody ever observes half a batch.

use std::collections::BTreeMap;
use std::sync::Arc;

use mazenet_protocol::{
    ComponentSet, EntityId, ProtocolError, ReplicationBatch,
    SerializationRegistry,
};
use tokio::sync::{broadcast, watch};

/// An immutable view of every replicated entity.
pub type Snapshot = Arc<BTreeMap<EntityId, ComponentSet>>;

/// Capacity of the change feed. Slow subscribers lag rather than block.
const CHANGE_FEED_CAPACITY: usize = 64;

/// Notification sent after a batch has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaChange {
    pub tick: u64,
    pub server_time: u64,
    /// Entities whose component set changed (or appeared).
    pub updated: Vec<EntityId>,
    pub removed: Vec<EntityId>,
}

/// Writer side of the replica. Owned by the client actor.
#[derive(Debug)]
pub struct ReplicaStore {
    registry: Arc<SerializationRegistry>,
    snapshot: watch::Sender<Snapshot>,
    changes: broadcast::Sender<ReplicaChange>,
    last_tick: Option<u64>,
}

impl ReplicaStore {
    pub fn new(registry: Arc<SerializationRegistry>) -> Self {
        let (snapshot, _) = watch::channel(Snapshot::default());
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            registry,
            snapshot,
            changes,
            last_tick: None,
        }
    }

    /// A cloneable read handle.
    pub fn view(&self) -> ReplicaView {
        ReplicaView {
            snapshot: self.snapshot.subscribe(),
            changes: self.changes.clone(),
        }
    }

    pub fn last_tick(&self) -> Option<u64> {
        self.last_tick
    }

    /// Applies one batch.
    ///
    /// # Errors
    /// Returns the first decode failure; the store is left untouched and
    /// the whole batch is dropped.
    pub fn apply(&mut self, batch: &ReplicationBatch) -> Result<ReplicaChange, ProtocolError> {
        let decoded = batch
            .entities
            .iter()
            .map(|state| {
                ComponentSet::decode(&self.registry, &state.components)
                    .map(|set| (state.entity, set))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let current = self.snapshot.borrow().clone();
        let mut next = if batch.full {
            BTreeMap::new()
        } else {
            current.as_ref().clone()
        };

        let updated: Vec<EntityId> = decoded.iter().map(|(id, _)| *id).collect();
        for (entity, set) in decoded {
            next.insert(entity, set);
        }

        let mut removed = Vec::new();
        for entity in &batch.removed {
            if next.remove(entity).is_some() {
                removed.push(*entity);
            }
        }
        if batch.full {
            // Anything the snapshot omits is gone.
            let vanished: Vec<EntityId> = current
                .keys()
                .filter(|id| !next.contains_key(*id) && !removed.contains(*id))
                .copied()
                .collect();
            removed.extend(vanished);
        }

        self.snapshot.send_replace(Arc::new(next));
        self.last_tick = Some(batch.tick);

        let change = ReplicaChange {
            tick: batch.tick,
            server_time: batch.server_time,
            updated,
            removed,
        };
        // No receivers is fine.
        let _ = self.changes.send(change.clone());

        tracing::trace!(
            tick = batch.tick,
            full = batch.full,
            updated = change.updated.len(),
            removed = change.removed.len(),
            "replication batch applied"
        );
        Ok(change)
    }
}

/// Read side of the replica.
#[derive(Debug, Clone)]
pub struct ReplicaView {
    snapshot: watch::Receiver<Snapshot>,
    changes: broadcast::Sender<ReplicaChange>,
}

impl ReplicaView {
    /// The latest fully applied state.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn get(&self, entity: EntityId) -> Option<ComponentSet> {
        self.snapshot.borrow().get(&entity).cloned()
    }

    /// Subscribes to per-batch change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaChange> {
        self.changes.subscribe()
    }

    /// Waits until the next batch is applied.
    ///
    /// Returns `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.snapshot.changed().await.ok()?;
        Some(self.snapshot.borrow_and_update().clone())
    }
}
