//! Error types for the client runtime.

use mazenet_protocol::{ProtocolError, RegistryError};
use mazenet_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The server refused the handshake.
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// The server did not answer the handshake in time.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The client runtime has stopped.
    #[error("client is closed")]
    Closed,
}
