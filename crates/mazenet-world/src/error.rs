//! Error types for the world layer.

use mazenet_protocol::{EntityId, ProtocolError};

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The entity does not exist (never spawned, or already removed).
    #[error("entity {0} not found")]
    UnknownEntity(EntityId),

    /// The entity id is already in use.
    #[error("entity {0} already exists")]
    EntityExists(EntityId),

    /// A component could not be encoded for replication.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The simulation actor has stopped.
    #[error("simulation is not running")]
    Unavailable,
}
