//! The serialization registry: type tag → encode/decode strategy.
//!
//! Built once while the process starts, then shared read-only behind an
//! `Arc`. Lookups on the hot path take no locks.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use serde::{Serialize, de::DeserializeOwned};

use mazenet_transport::Delivery;

use crate::plain::{decode_plain, encode_plain};
use crate::{
    BincodeCodec, Channel, Codec, PlainFields, ProtocolError, RegistryError,
    TypeTag,
};

/// A decoded value whose concrete type is only known through its tag.
pub type ErasedValue = Box<dyn Any + Send + Sync>;

/// A type that can travel on the wire.
///
/// The tag and the delivery intent are properties of the type, fixed at
/// build time.
pub trait WireType: Any + Send + Sync + Sized {
    const TAG: TypeTag;
    const NAME: &'static str;
    const DELIVERY: Delivery = Delivery::Reliable;
    const CHANNEL: Channel = Channel::Control;
}

/// How a registered type is turned into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// serde derive, encoded with bincode in declared field layout.
    SelfDescribing,
    /// Declared field list, written as `(name, value)` pairs.
    PlainFields,
}

type EncodeFn = fn(&(dyn Any + Send + Sync)) -> Result<Vec<u8>, ProtocolError>;
type DecodeFn = fn(&[u8]) -> Result<ErasedValue, ProtocolError>;

/// One registry entry.
#[derive(Clone)]
pub struct Binding {
    tag: TypeTag,
    name: &'static str,
    type_id: TypeId,
    strategy: Strategy,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl Binding {
    /// A binding for a serde type.
    pub fn self_describing<T>() -> Self
    where
        T: WireType + Serialize + DeserializeOwned,
    {
        Self {
            tag: T::TAG,
            name: T::NAME,
            type_id: TypeId::of::<T>(),
            strategy: Strategy::SelfDescribing,
            encode: encode_self_describing::<T>,
            decode: decode_self_describing::<T>,
        }
    }

    /// A binding for a [`PlainFields`] type.
    pub fn plain_fields<T>() -> Self
    where
        T: WireType + PlainFields,
    {
        Self {
            tag: T::TAG,
            name: T::NAME,
            type_id: TypeId::of::<T>(),
            strategy: Strategy::PlainFields,
            encode: encode_plain_erased::<T>,
            decode: decode_plain_erased::<T>,
        }
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("tag", &self.tag)
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .finish()
    }
}

fn downcast<T: WireType>(value: &(dyn Any + Send + Sync)) -> Result<&T, ProtocolError> {
    value
        .downcast_ref::<T>()
        .ok_or(ProtocolError::TypeMismatch(T::NAME))
}

fn encode_self_describing<T>(
    value: &(dyn Any + Send + Sync),
) -> Result<Vec<u8>, ProtocolError>
where
    T: WireType + Serialize,
{
    BincodeCodec.encode(downcast::<T>(value)?)
}

fn decode_self_describing<T>(bytes: &[u8]) -> Result<ErasedValue, ProtocolError>
where
    T: WireType + DeserializeOwned,
{
    let value: T = BincodeCodec.decode(bytes)?;
    Ok(Box::new(value))
}

fn encode_plain_erased<T>(
    value: &(dyn Any + Send + Sync),
) -> Result<Vec<u8>, ProtocolError>
where
    T: WireType + PlainFields,
{
    encode_plain(downcast::<T>(value)?, T::NAME)
}

fn decode_plain_erased<T>(bytes: &[u8]) -> Result<ErasedValue, ProtocolError>
where
    T: WireType + PlainFields,
{
    let value: T = decode_plain(bytes, T::NAME)?;
    Ok(Box::new(value))
}

/// Maps type tags to their encode/decode strategy.
#[derive(Debug, Default)]
pub struct SerializationRegistry {
    by_tag: HashMap<TypeTag, Binding>,
    by_type: HashMap<TypeId, TypeTag>,
}

impl SerializationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one binding.
    ///
    /// # Errors
    /// [`RegistryError::AlreadyRegistered`] if the tag, or the Rust type,
    /// already has a binding. The registry is left unchanged.
    pub fn register(&mut self, binding: Binding) -> Result<(), RegistryError> {
        if self.by_tag.contains_key(&binding.tag)
            || self.by_type.contains_key(&binding.type_id)
        {
            return Err(RegistryError::AlreadyRegistered {
                tag: binding.tag,
                name: binding.name,
            });
        }
        self.by_type.insert(binding.type_id, binding.tag);
        self.by_tag.insert(binding.tag, binding);
        Ok(())
    }

    /// Adds a batch of bindings, all or nothing.
    ///
    /// Every entry is attempted so the error names all failing tags. If any
    /// entry failed, the ones this call added are removed again.
    pub fn register_batch(
        &mut self,
        bindings: impl IntoIterator<Item = Binding>,
    ) -> Result<(), RegistryError> {
        let mut added = Vec::new();
        let mut failed = Vec::new();

        for binding in bindings {
            let tag = binding.tag;
            match self.register(binding) {
                Ok(()) => added.push(tag),
                Err(_) => failed.push(tag),
            }
        }

        if failed.is_empty() {
            return Ok(());
        }
        for tag in added {
            if let Some(binding) = self.by_tag.remove(&tag) {
                self.by_type.remove(&binding.type_id);
            }
        }
        Err(RegistryError::PartialFailure { failed })
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.by_tag.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }

    pub fn name_of(&self, tag: TypeTag) -> Option<&'static str> {
        self.by_tag.get(&tag).map(|b| b.name)
    }

    pub fn strategy_of(&self, tag: TypeTag) -> Option<Strategy> {
        self.by_tag.get(&tag).map(|b| b.strategy)
    }

    /// Encodes a typed value with its registered strategy.
    pub fn encode<T: WireType>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        let tag = self
            .by_type
            .get(&TypeId::of::<T>())
            .ok_or(ProtocolError::NotRegistered(T::NAME))?;
        self.encode_erased(*tag, value)
    }

    /// Encodes a type-erased value stored under `tag`.
    pub fn encode_erased(
        &self,
        tag: TypeTag,
        value: &(dyn Any + Send + Sync),
    ) -> Result<Vec<u8>, ProtocolError> {
        let binding = self.by_tag.get(&tag).ok_or(ProtocolError::UnknownType(tag))?;
        (binding.encode)(value)
    }

    /// Decodes `bytes` as the type registered under `tag`.
    pub fn decode(&self, tag: TypeTag, bytes: &[u8]) -> Result<ErasedValue, ProtocolError> {
        let binding = self.by_tag.get(&tag).ok_or(ProtocolError::UnknownType(tag))?;
        (binding.decode)(bytes)
    }

    /// Decodes `bytes` as `T`.
    pub fn decode_as<T: WireType>(&self, bytes: &[u8]) -> Result<T, ProtocolError> {
        let value = self.decode(T::TAG, bytes)?;
        value
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| ProtocolError::TypeMismatch(T::NAME))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::plain_fields;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        text: String,
    }

    impl WireType for Greeting {
        const TAG: TypeTag = TypeTag(500);
        const NAME: &'static str = "Greeting";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Farewell {
        code: u8,
    }

    impl WireType for Farewell {
        const TAG: TypeTag = TypeTag(501);
        const NAME: &'static str = "Farewell";
    }

    /// Same tag as `Greeting`, different Rust type.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Impostor;

    impl WireType for Impostor {
        const TAG: TypeTag = TypeTag(500);
        const NAME: &'static str = "Impostor";
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Marker {
        x: i32,
        y: i32,
    }

    plain_fields!(Marker { x, y });

    impl WireType for Marker {
        const TAG: TypeTag = TypeTag(502);
        const NAME: &'static str = "Marker";
    }

    #[test]
    fn test_register_then_round_trip_self_describing() {
        let mut registry = SerializationRegistry::new();
        registry.register(Binding::self_describing::<Greeting>()).unwrap();

        let value = Greeting { text: "hi".into() };
        let bytes = registry.encode(&value).unwrap();
        let back: Greeting = registry.decode_as(&bytes).unwrap();

        assert_eq!(back, value);
        assert_eq!(
            registry.strategy_of(Greeting::TAG),
            Some(Strategy::SelfDescribing)
        );
    }

    #[test]
    fn test_register_then_round_trip_plain_fields() {
        let mut registry = SerializationRegistry::new();
        registry.register(Binding::plain_fields::<Marker>()).unwrap();

        let value = Marker { x: -4, y: 9 };
        let bytes = registry.encode(&value).unwrap();
        let erased = registry.decode(Marker::TAG, &bytes).unwrap();

        assert_eq!(erased.downcast_ref::<Marker>(), Some(&value));
    }

    #[test]
    fn test_register_same_tag_twice_returns_already_registered() {
        let mut registry = SerializationRegistry::new();
        registry.register(Binding::self_describing::<Greeting>()).unwrap();

        let result = registry.register(Binding::self_describing::<Impostor>());

        assert!(matches!(
            result,
            Err(RegistryError::AlreadyRegistered { name: "Impostor", .. })
        ));
        assert_eq!(registry.name_of(TypeTag(500)), Some("Greeting"));
    }

    #[test]
    fn test_register_same_type_twice_returns_already_registered() {
        let mut registry = SerializationRegistry::new();
        registry.register(Binding::self_describing::<Greeting>()).unwrap();

        let result = registry.register(Binding::self_describing::<Greeting>());

        assert!(matches!(result, Err(RegistryError::AlreadyRegistered { .. })));
    }

    #[test]
    fn test_batch_with_duplicate_rolls_back_everything() {
        let mut registry = SerializationRegistry::new();

        let result = registry.register_batch([
            Binding::self_describing::<Greeting>(),
            Binding::self_describing::<Farewell>(),
            Binding::self_describing::<Greeting>(),
        ]);

        match result {
            Err(RegistryError::PartialFailure { failed }) => {
                assert_eq!(failed, vec![Greeting::TAG]);
            }
            other => panic!("expected PartialFailure, got {other:?}"),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failed_batch_keeps_earlier_registrations() {
        let mut registry = SerializationRegistry::new();
        registry.register(Binding::self_describing::<Greeting>()).unwrap();

        let result = registry.register_batch([
            Binding::self_describing::<Farewell>(),
            Binding::self_describing::<Impostor>(),
        ]);

        assert!(result.is_err());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(Greeting::TAG));
        assert!(!registry.contains(Farewell::TAG));
    }

    #[test]
    fn test_decode_unknown_tag_returns_unknown_type() {
        let registry = SerializationRegistry::new();
        let result = registry.decode(TypeTag(999), &[]);
        assert!(matches!(result, Err(ProtocolError::UnknownType(TypeTag(999)))));
    }

    #[test]
    fn test_encode_unregistered_type_returns_not_registered() {
        let registry = SerializationRegistry::new();
        let result = registry.encode(&Farewell { code: 1 });
        assert!(matches!(result, Err(ProtocolError::NotRegistered("Farewell"))));
    }

    #[test]
    fn test_encode_erased_wrong_type_returns_type_mismatch() {
        let mut registry = SerializationRegistry::new();
        registry.register(Binding::self_describing::<Greeting>()).unwrap();

        let result = registry.encode_erased(Greeting::TAG, &Farewell { code: 1 });

        assert!(matches!(result, Err(ProtocolError::TypeMismatch("Greeting"))));
    }
}
