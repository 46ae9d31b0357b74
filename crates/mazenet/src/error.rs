//! Unified error type for the mazenet server.

use mazenet_protocol::{ProtocolError, RegistryError};
use mazenet_session::SessionError;
use mazenet_transport::TransportError;
use mazenet_world::WorldError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum MazenetError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message that could not be encoded, decoded or dispatched.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The type registry could not be built. Fatal at startup.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    World(#[from] WorldError),

    /// The configuration file could not be read.
    #[error("cannot read config {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for `ServerConfig`.
    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// A setting is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The client spoke another protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    /// The connection ended or stalled before the handshake completed.
    #[error("handshake failed: {0}")]
    Handshake(String),
}
