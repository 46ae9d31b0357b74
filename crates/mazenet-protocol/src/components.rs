//! Replicated components.
//!
//! Components are plain-field records: immutable values the server attaches
//! to entities and replaces wholesale. Clients only ever read them.
//!
//! A [`ComponentSet`] holds one entity's components keyed by tag. The server
//! world and the client replica both store entities this way, so the same
//! set can be encoded into a [`ComponentBlob`] list and rebuilt from one.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{
    ComponentBlob, Direction, ProtocolError, SerializationRegistry, TypeTag,
    WireType, plain_fields,
};

/// Grid cell an entity stands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

plain_fields!(Position { x, y });

impl Position {
    /// The neighbouring cell in `direction`.
    pub fn step(self, direction: Direction) -> Self {
        let (dx, dy) = direction.delta();
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// A player's chosen name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayName {
    pub name: String,
}

plain_fields!(DisplayName { name });

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub current: u32,
    pub max: u32,
}

plain_fields!(Health { current, max });

impl Health {
    pub fn full(max: u32) -> Self {
        Self { current: max, max }
    }
}

/// Marks an entity whose owner disconnected. The entity is removed once
/// the corpse has decayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dead {
    /// Server time of death, milliseconds.
    pub died_at: u64,
}

plain_fields!(Dead { died_at });

wire_type!(Position, 100);
wire_type!(DisplayName, 101);
wire_type!(Health, 102);
wire_type!(Dead, 103);

/// A shared, type-erased component value.
pub type ComponentValue = Arc<dyn Any + Send + Sync>;

/// The components of one entity, at most one per type.
#[derive(Clone, Default)]
pub struct ComponentSet {
    values: BTreeMap<TypeTag, ComponentValue>,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the component of type `T`.
    pub fn insert<T: WireType>(&mut self, value: T) {
        self.values.insert(T::TAG, Arc::new(value));
    }

    pub fn insert_erased(&mut self, tag: TypeTag, value: ComponentValue) {
        self.values.insert(tag, value);
    }

    pub fn get<T: WireType>(&self) -> Option<&T> {
        self.values.get(&T::TAG)?.downcast_ref::<T>()
    }

    pub fn contains<T: WireType>(&self) -> bool {
        self.values.contains_key(&T::TAG)
    }

    pub fn remove<T: WireType>(&mut self) -> bool {
        self.values.remove(&T::TAG).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.values.keys().copied()
    }

    /// Encodes every component, in tag order.
    pub fn encode(
        &self,
        registry: &SerializationRegistry,
    ) -> Result<Vec<ComponentBlob>, ProtocolError> {
        self.values
            .iter()
            .map(|(tag, value)| {
                Ok(ComponentBlob {
                    tag: *tag,
                    body: registry.encode_erased(*tag, value.as_ref())?,
                })
            })
            .collect()
    }

    /// Rebuilds a set from encoded blobs. Fails on the first blob that
    /// doesn't decode.
    pub fn decode(
        registry: &SerializationRegistry,
        blobs: &[ComponentBlob],
    ) -> Result<Self, ProtocolError> {
        let mut set = Self::new();
        for blob in blobs {
            let value = registry.decode(blob.tag, &blob.body)?;
            set.insert_erased(blob.tag, Arc::from(value));
        }
        Ok(set)
    }
}

impl std::fmt::Debug for ComponentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}
