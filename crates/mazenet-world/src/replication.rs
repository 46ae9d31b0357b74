//! Server side of entity replication.
//!
//! The hub keeps one entry per subscribed connection. Once per tick the
//! simulation hands it the change log; the hub encodes one delta batch,
//! and one full snapshot if anyone subscribed since the last tick, and
//! pushes the shared frames onto each subscriber's replication lane.
//!
//! A subscriber whose lane is full misses deltas. It is flagged for a
//! snapshot again and gets one as soon as its lane has room, which
//! replaces whatever state it missed.

use std::collections::BTreeMap;

use mazenet_protocol::{Protocol, ReplicationBatch};
use mazenet_transport::{ConnectionId, Frame, Outbox, TransportError};

use crate::{Changes, World, WorldError};

struct Subscriber {
    outbox: Outbox,
    /// Set until the subscriber has received a full batch, and again after
    /// it fell behind.
    needs_snapshot: bool,
}

#[derive(Default)]
pub(crate) struct ReplicationHub {
    subscribers: BTreeMap<ConnectionId, Subscriber>,
}

impl ReplicationHub {
    pub(crate) fn attach(&mut self, outbox: Outbox) {
        let conn_id = outbox.conn_id();
        self.subscribers.insert(
            conn_id,
            Subscriber {
                outbox,
                needs_snapshot: true,
            },
        );
        tracing::debug!(%conn_id, "replication subscriber attached");
    }

    /// Drops the subscriber and everything still queued for it.
    pub(crate) fn detach(&mut self, conn_id: ConnectionId) -> bool {
        let removed = self.subscribers.remove(&conn_id).is_some();
        if removed {
            tracing::debug!(%conn_id, "replication subscriber detached");
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Sends this tick's batches.
    pub(crate) fn publish(
        &mut self,
        world: &World,
        protocol: &Protocol,
        tick: u64,
        server_time: u64,
        changes: Changes,
    ) -> Result<(), WorldError> {
        if self.subscribers.is_empty() {
            return Ok(());
        }
        let registry = protocol.registry();

        let delta = if changes.is_empty() {
            None
        } else {
            let entities = changes
                .updated
                .iter()
                .map(|id| world.encode_entity(registry, *id))
                .collect::<Result<Vec<_>, _>>()?;
            let batch = ReplicationBatch {
                tick,
                server_time,
                full: false,
                entities,
                removed: changes.removed,
            };
            Some(protocol.frame(tick, &batch)?)
        };

        let snapshot = if self
            .subscribers
            .values()
            .any(|s| s.needs_snapshot && s.outbox.replication_room() > 0)
        {
            let entities = world
                .entity_ids()
                .into_iter()
                .map(|id| world.encode_entity(registry, id))
                .collect::<Result<Vec<_>, _>>()?;
            let batch = ReplicationBatch {
                tick,
                server_time,
                full: true,
                entities,
                removed: Vec::new(),
            };
            Some(protocol.frame(tick, &batch)?)
        } else {
            None
        };

        let mut gone = Vec::new();
        for (conn_id, sub) in &mut self.subscribers {
            let frame: Option<&Frame> = if sub.needs_snapshot {
                snapshot.as_ref()
            } else {
                delta.as_ref()
            };
            let Some(frame) = frame else { continue };
            match sub.outbox.push(frame.clone()) {
                Ok(()) => sub.needs_snapshot = false,
                Err(TransportError::Backlogged) => {
                    if !sub.needs_snapshot {
                        tracing::debug!(%conn_id, tick, "replication lane full, will resend a snapshot");
                    }
                    sub.needs_snapshot = true;
                }
                Err(_) => gone.push(*conn_id),
            }
        }
        for conn_id in gone {
            tracing::debug!(%conn_id, "outbox closed, dropping subscriber");
            self.subscribers.remove(&conn_id);
        }
        Ok(())
    }
}
