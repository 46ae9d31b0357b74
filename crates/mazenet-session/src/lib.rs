//! Connection sessions for the mazenet server.
//!
//! Every accepted connection that passes the version handshake gets one
//! [`ConnectionSession`]. The session:
//!
//! 1. attaches the connection to world replication;
//! 2. turns the first identity message into a spawned player entity;
//! 3. forwards movement intents once the player exists;
//! 4. on disconnect, marks the player dead and detaches.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)      ← owns one session per connection task
//!     ↕
//! Session (this crate)
//!     ↕
//! World (below)       ← simulation commands, replication subscription
//! ```
//!
//! The [`SessionTable`] mirrors every live session so the operator console
//! can list connections without reaching into connection tasks.

mod error;
mod session;
mod table;

pub use error::SessionError;
pub use session::{ConnectionSession, SessionState};
pub use table::{ConnectionInfo, SessionTable};
