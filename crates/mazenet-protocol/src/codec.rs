//! Codec trait and the binary implementation used on the wire.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The envelope layer doesn't care HOW values are serialized, it only needs
//! something that implements [`Codec`]. [`BincodeCodec`] is the one the
//! server and client use: compact, fixed layout, no field names on the wire.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// - `Send + Sync` → shared by every connection task.
/// - `'static` → lives as long as the server.
///
/// The methods are generic, so the trait is used through generics
/// (`Protocol<C: Codec>`), never as a trait object.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the value can't be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// BincodeCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `bincode`.
///
/// ```rust
/// use mazenet_protocol::{BincodeCodec, Channel, Codec, Envelope, TypeTag};
///
/// let codec = BincodeCodec;
/// let envelope = Envelope {
///     seq: 1,
///     channel: Channel::Control,
///     tag: TypeTag(12),
///     body: vec![1, 2, 3],
/// };
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: Envelope = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(value).map_err(|source| ProtocolError::Encode {
            type_name: std::any::type_name::<T>(),
            source,
        })
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        bincode::deserialize(data).map_err(|source| ProtocolError::Decode {
            type_name: std::any::type_name::<T>(),
            source,
        })
    }
}
