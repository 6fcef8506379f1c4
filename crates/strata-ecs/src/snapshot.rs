//! Encoded entity snapshots.
//!
//! An [`EncodedEntity`] is the persisted or replicated form of an entity:
//! one opaque payload per component id, exactly as it came off the wire.
//! Payloads are reference-counted so that cloning a snapshot (or building a
//! lazy view over it) never copies component bytes.
//!
//! A payload slot may also be an explicit tombstone, which is how change
//! streams record "this component was cleared".

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::component::ComponentId;
use crate::delta::Slot;
use crate::entity::EntityId;
use crate::EcsError;

// ---------------------------------------------------------------------------
// EncodedEntity
// ---------------------------------------------------------------------------

/// Serializable per-component encoded payloads for one entity.
///
/// `None` values are tombstones. Uses `BTreeMap` for deterministic
/// serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedEntity {
    /// The entity's id.
    pub id: EntityId,
    /// Map from component id to encoded payload, or `None` for a tombstone.
    pub components: BTreeMap<ComponentId, Option<Arc<[u8]>>>,
}

impl EncodedEntity {
    /// A snapshot with no payloads.
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            components: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Store the payload for component `id`.
    pub fn insert(&mut self, id: ComponentId, bytes: impl Into<Arc<[u8]>>) {
        self.components.insert(id, Some(bytes.into()));
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, id: ComponentId, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.insert(id, bytes);
        self
    }

    /// Record that component `id` was cleared.
    pub fn insert_tombstone(&mut self, id: ComponentId) {
        self.components.insert(id, None);
    }

    /// The slot for component `id`: unset, tombstoned or a payload.
    pub fn payload(&self, id: ComponentId) -> Slot<&[u8]> {
        match self.components.get(&id) {
            None => Slot::Unset,
            Some(None) => Slot::Cleared,
            Some(Some(bytes)) => Slot::Value(&bytes[..]),
        }
    }

    /// The payload for component `id`, ignoring tombstones.
    pub fn bytes(&self, id: ComponentId) -> Option<&[u8]> {
        self.payload(id).value()
    }

    /// Whether the snapshot has an opinion (payload or tombstone) on `id`.
    pub fn contains(&self, id: ComponentId) -> bool {
        self.components.contains_key(&id)
    }

    /// Ids with an opinion, ascending.
    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Serialize to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidSnapshot`] if serialization fails.
    pub fn to_json(&self) -> Result<String, EcsError> {
        serde_json::to_string(self).map_err(|e| EcsError::InvalidSnapshot {
            entity: Some(self.id),
            details: e.to_string(),
        })
    }

    /// Parse from a JSON string produced by [`to_json`](Self::to_json).
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidSnapshot`] if the document is malformed.
    /// Component payloads are not inspected here.
    pub fn from_json(json: &str) -> Result<Self, EcsError> {
        serde_json::from_str(json).map_err(|e| EcsError::InvalidSnapshot {
            entity: None,
            details: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
