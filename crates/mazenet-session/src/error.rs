//! Error types for the session layer.

use mazenet_world::WorldError;

/// Errors raised by session operations.
///
/// None of these end the connection. The server logs them at debug level
/// and drops the message that caused them.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A second identity message arrived. Only the first one counts.
    #[error("connection already identified")]
    AlreadyIdentified,

    /// A gameplay message arrived before the identity message.
    #[error("connection has not identified yet")]
    NotActive,

    /// The identity message carried a blank display name.
    #[error("display name is empty")]
    EmptyName,

    /// The session is already closed.
    #[error("session is closed")]
    Closed,

    /// The simulation refused the command.
    #[error(transparent)]
    World(#[from] WorldError),
}
