//! # mazenet
//!
//! Authoritative server for a small multiplayer maze game.
//!
//! Clients connect over WebSocket, pass a version handshake, announce a
//! display name and get a player entity in a shared grid world. They send
//! move intents; the server simulates at a fixed tick rate and replicates
//! every entity's components back to every connection, one batch per tick.
//!
//! ## Layers
//!
//! ```text
//! mazenet (this crate)   server builder, connection handler, console
//!   ├─ mazenet-session   per-connection lifecycle
//!   ├─ mazenet-world     entity store, simulation actor, replication
//!   │    └─ mazenet-tick fixed-timestep scheduler
//!   ├─ mazenet-protocol  messages, components, registry, dispatcher
//!   └─ mazenet-transport WebSocket connections and outbound lanes
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mazenet::MazenetServer;
//!
//! # async fn run() -> Result<(), mazenet::MazenetError> {
//! let server = MazenetServer::builder().port(7777).build().await?;
//! let handle = server.handle();
//! tokio::spawn(async move {
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     handle.shutdown();
//! });
//! server.run().await
//! # }
//! ```

pub mod console;
mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::MazenetError;
pub use server::{MazenetServer, MazenetServerBuilder, ServerHandle};

pub use mazenet_protocol::PROTOCOL_VERSION;
