//! Authoritative world state for mazenet.
//!
//! - [`World`]: the entity/component store, with a per-tick change log.
//! - [`spawn_world`]: starts the simulation actor, the world's only writer,
//!   and returns a [`WorldHandle`] for enqueueing commands.
//! - Replication: connections [`attach`](WorldHandle::attach) their outbox
//!   and receive one batch per tick in which something changed, starting
//!   with a full snapshot.

mod config;
mod error;
mod replication;
mod sim;
mod world;

pub use config::WorldConfig;
pub use error::WorldError;
pub use sim::{SimCommand, SubscriptionHandle, WorldHandle, WorldStats, spawn_world};
pub use world::{Changes, EntityAllocator, World};
