//! Error types for the protocol layer.
//!
//! Two enums live here because they fail at very different times:
//!
//! - [`RegistryError`] happens while the process boots and registers its
//!   schema. It is fatal: a server with a half-registered schema must not
//!   serve traffic.
//! - [`ProtocolError`] happens per message. It is never fatal for the
//!   connection: the offending message is logged and dropped.

use crate::TypeTag;

/// Errors raised while encoding, decoding, or dispatching one message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[error("encode failed for {type_name}: {source}")]
    Encode {
        type_name: &'static str,
        #[source]
        source: bincode::Error,
    },

    /// Deserialization failed: malformed, truncated, or wrong shape.
    #[error("decode failed for {type_name}: {source}")]
    Decode {
        type_name: &'static str,
        #[source]
        source: bincode::Error,
    },

    /// A plain-field record arrived without one of its declared fields.
    ///
    /// This is what a renamed or removed field looks like on the wire.
    #[error("decode failed for {type_name}: missing field `{field}`")]
    MissingField {
        type_name: &'static str,
        field: &'static str,
    },

    /// A plain-field encoder wrote its fields in a different order than
    /// its declared field list.
    #[error("{type_name} wrote fields out of declaration order")]
    FieldOrder { type_name: &'static str },

    /// The tag is not in the registry (newer or older peer).
    #[error("unknown type tag {0}")]
    UnknownType(TypeTag),

    /// Tried to encode a Rust type that was never registered.
    #[error("type {0} is not registered")]
    NotRegistered(&'static str),

    /// The tag is registered but this role has no handler for it.
    #[error("no handler registered for {0}")]
    Unhandled(TypeTag),

    /// A second handler was registered for the same tag.
    #[error("a handler for {0} is already registered")]
    DuplicateHandler(TypeTag),

    /// A type-erased value did not hold the type its tag promised.
    #[error("value is not a {0}")]
    TypeMismatch(&'static str),

    /// The message decoded fine but breaks a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Errors raised while building the serialization registry at startup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The tag (or the Rust type behind it) already has a binding.
    #[error("{name} ({tag}) is already registered")]
    AlreadyRegistered { tag: TypeTag, name: &'static str },

    /// One or more entries of a batch failed; none of the batch was kept.
    #[error("batch registration failed for {failed:?}")]
    PartialFailure { failed: Vec<TypeTag> },
}
