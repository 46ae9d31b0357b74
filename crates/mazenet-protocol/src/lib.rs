//! Wire protocol for mazenet.
//!
//! This crate defines everything that crosses the network between a
//! mazenet client and server:
//!
//! - the closed set of messages and replicated components, each with a
//!   fixed [`TypeTag`], channel and delivery intent ([`WireType`]);
//! - the [`Envelope`] every frame is wrapped in, encoded by a [`Codec`];
//! - the [`SerializationRegistry`], mapping tags to one of two strategies:
//!   serde types ("self-describing") and [`PlainFields`] records;
//! - the [`Dispatcher`] that routes inbound messages to handlers;
//! - the [`Protocol`] bundle tying registry and codec together.
//!
//! ```rust
//! use mazenet_protocol::{IdentityAnnounce, Protocol};
//!
//! let protocol = Protocol::standard().unwrap();
//! let frame = protocol
//!     .frame(1, &IdentityAnnounce { name: "Alice".into() })
//!     .unwrap();
//! let back: IdentityAnnounce = protocol.open_as(&frame.bytes).unwrap();
//! assert_eq!(back.name, "Alice");
//! ```

/// Declares the wire identity of a message or component type.
macro_rules! wire_type {
    ($ty:ident, $tag:expr) => {
        wire_type!($ty, $tag, $crate::Channel::Control);
    };
    ($ty:ident, $tag:expr, $channel:expr) => {
        impl $crate::WireType for $ty {
            const TAG: $crate::TypeTag = $crate::TypeTag($tag);
            const NAME: &'static str = stringify!($ty);
            const DELIVERY: ::mazenet_transport::Delivery =
                ::mazenet_transport::Delivery::Reliable;
            const CHANNEL: $crate::Channel = $channel;
        }
    };
}

mod codec;
mod components;
mod dispatch;
mod error;
mod plain;
mod registry;
mod time;
mod types;
mod wire;

pub use codec::{BincodeCodec, Codec};
pub use components::{
    ComponentSet, ComponentValue, Dead, DisplayName, Health, Position,
};
pub use dispatch::Dispatcher;
pub use error::{ProtocolError, RegistryError};
pub use plain::{
    FieldReader, FieldWriter, PlainField, PlainFields, decode_plain,
    encode_plain,
};
pub use registry::{
    Binding, ErasedValue, SerializationRegistry, Strategy, WireType,
};
pub use time::MonotonicClock;
pub use types::*;
pub use wire::{Protocol, standard_bindings};
