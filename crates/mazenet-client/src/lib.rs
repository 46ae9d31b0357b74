//! Client runtime for mazenet.
//!
//! [`GameClient`] connects to a server, announces the player and keeps:
//!
//! - an estimate of the server clock ([`ClockSynchronizer`]), from which
//!   a lagged render time is derived for interpolation;
//! - a read-only replica of every entity ([`ReplicaStore`]), updated one
//!   whole replication batch at a time;
//! - a [`MoveLimiter`] so a held direction key doesn't flood the server.
//!
//! ```rust,no_run
//! use mazenet_client::{ClientConfig, GameClient};
//! use mazenet_protocol::{Direction, Position};
//!
//! # async fn run() -> Result<(), mazenet_client::ClientError> {
//! let client = GameClient::connect("127.0.0.1:7777", "Alice", ClientConfig::default()).await?;
//! let me = client.wait_for_entity().await?;
//! client.move_towards(Direction::North).await?;
//! if let Some(set) = client.snapshot().get(&me) {
//!     println!("at {:?}", set.get::<Position>());
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod clock;
mod config;
mod error;
mod limiter;
mod replica;

pub use client::{ClientStatus, GameClient};
pub use clock::{ClockState, ClockSynchronizer};
pub use config::{ClientConfig, ClockConfig};
pub use error::ClientError;
pub use limiter::MoveLimiter;
pub use replica::{ReplicaChange, ReplicaStore, ReplicaView, Snapshot};
