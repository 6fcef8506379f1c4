//! Entity identifiers and fully-decoded entities.
//!
//! An [`EntityId`] is an opaque 64-bit handle assigned by whoever owns the
//! entity table; this crate never allocates ids itself. A
//! [`ConcreteEntity`] is an id plus a map of decoded component values, the
//! plain form every other wrapper can be materialized into.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentId, ComponentValue};
use crate::registry::ComponentRegistry;
use crate::snapshot::EncodedEntity;
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// An opaque entity identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Wrap a raw id.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

// ---------------------------------------------------------------------------
// ConcreteEntity
// ---------------------------------------------------------------------------

/// An entity whose components are all decoded and held in memory.
///
/// Absent keys mean "component not present". Components are kept in a
/// `BTreeMap` so iteration order (and therefore encoding) is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcreteEntity {
    id: EntityId,
    components: BTreeMap<ComponentId, ComponentValue>,
}

impl ConcreteEntity {
    /// An entity with no components.
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            components: BTreeMap::new(),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Set component `T`, returning the previous value if any.
    pub fn insert<T: Component>(&mut self, value: T) -> Option<ComponentValue> {
        self.components
            .insert(T::component_id(), ComponentValue::new(value))
    }

    /// Set a type-erased component value under `id`.
    pub fn insert_value(&mut self, id: ComponentId, value: ComponentValue) -> Option<ComponentValue> {
        self.components.insert(id, value)
    }

    /// Remove component `id`, returning it if it was present.
    pub fn remove(&mut self, id: ComponentId) -> Option<ComponentValue> {
        self.components.remove(&id)
    }

    pub fn component(&self, id: ComponentId) -> Option<&ComponentValue> {
        self.components.get(&id)
    }

    /// Typed access to component `T`.
    pub fn get<T: Component>(&self) -> Option<&T> {
        self.components
            .get(&T::component_id())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.components.contains_key(&id)
    }

    /// Present component ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ComponentId, &ComponentValue)> {
        self.components.iter().map(|(id, v)| (*id, v))
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Encode every component with the registry's codec.
    ///
    /// # Errors
    ///
    /// Propagates [`EcsError::UnknownComponentId`] and
    /// [`EcsError::EncodeError`] from the registry.
    pub fn encode(&self, registry: &ComponentRegistry) -> Result<EncodedEntity, EcsError> {
        let mut encoded = EncodedEntity::new(self.id);
        for (id, value) in &self.components {
            encoded.insert(*id, registry.encode(*id, value)?);
        }
        Ok(encoded)
    }
}

impl Extend<(ComponentId, ComponentValue)> for ConcreteEntity {
    fn extend<I: IntoIterator<Item = (ComponentId, ComponentValue)>>(&mut self, iter: I) {
        self.components.extend(iter);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
