//! The authoritative entity store.
//!
//! [`World`] maps entity ids to their [`ComponentSet`] and tracks which
//! entities changed since the last replication batch. It has exactly one
//! writer, the simulation actor; nothing here is shared or locked.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use mazenet_protocol::{
    ComponentSet, EntityId, EntityState, SerializationRegistry, WireType,
};

use crate::WorldError;

/// Hands out entity ids. Ids are never reused.
///
/// Allocation is lock-free so connection handlers can reserve an id
/// synchronously and enqueue the spawn for the simulation.
#[derive(Debug)]
pub struct EntityAllocator {
    next: AtomicU64,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> EntityId {
        EntityId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Entities changed since the last call to [`World::take_changes`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Changes {
    pub updated: Vec<EntityId>,
    pub removed: Vec<EntityId>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct World {
    entities: HashMap<EntityId, ComponentSet>,
    dirty: BTreeSet<EntityId>,
    removed: Vec<EntityId>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity with its initial components.
    pub fn spawn(
        &mut self,
        entity: EntityId,
        components: ComponentSet,
    ) -> Result<(), WorldError> {
        if self.entities.contains_key(&entity) {
            return Err(WorldError::EntityExists(entity));
        }
        self.entities.insert(entity, components);
        self.dirty.insert(entity);
        Ok(())
    }

    /// Replaces one component of an entity.
    pub fn insert<T: WireType>(
        &mut self,
        entity: EntityId,
        component: T,
    ) -> Result<(), WorldError> {
        let set = self
            .entities
            .get_mut(&entity)
            .ok_or(WorldError::UnknownEntity(entity))?;
        set.insert(component);
        self.dirty.insert(entity);
        Ok(())
    }

    pub fn despawn(&mut self, entity: EntityId) -> bool {
        if self.entities.remove(&entity).is_none() {
            return false;
        }
        self.dirty.remove(&entity);
        self.removed.push(entity);
        true
    }

    pub fn get<T: WireType>(&self, entity: EntityId) -> Option<&T> {
        self.entities.get(&entity)?.get::<T>()
    }

    pub fn components(&self, entity: EntityId) -> Option<&ComponentSet> {
        self.entities.get(&entity)
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Every entity id, sorted.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.entities.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Entities holding a component of type `T`.
    pub fn with<T: WireType>(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.entities
            .iter()
            .filter_map(|(id, set)| set.get::<T>().map(|c| (*id, c)))
    }

    /// Returns and clears the change log.
    pub fn take_changes(&mut self) -> Changes {
        Changes {
            updated: std::mem::take(&mut self.dirty).into_iter().collect(),
            removed: std::mem::take(&mut self.removed),
        }
    }

    /// Encodes an entity's full component set.
    pub fn encode_entity(
        &self,
        registry: &SerializationRegistry,
        entity: EntityId,
    ) -> Result<EntityState, WorldError> {
        let set = self
            .entities
            .get(&entity)
            .ok_or(WorldError::UnknownEntity(entity))?;
        Ok(EntityState {
            entity,
            components: set.encode(registry)?,
        })
    }
}
