//! Entity change stream.
//!
//! A [`Change`] is one event in an entity's history: created with a full
//! set of components, updated by a delta, or deleted. Successive changes to
//! the same entity can be folded into one with [`merge_change`], and applied
//! to a stored entity with [`apply_change`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::lazy::{LazyDelta, LazyEntity};
use crate::registry::ComponentRegistry;
use crate::snapshot::EncodedEntity;
use crate::EcsError;

/// Logical time at which a change was made.
pub type Tick = u64;

// ---------------------------------------------------------------------------
// Change
// ---------------------------------------------------------------------------

/// One event in an entity's history.
#[derive(Debug, Clone)]
pub enum Change {
    Create { tick: Tick, entity: LazyEntity },
    Update { tick: Tick, entity: LazyDelta },
    Delete { tick: Tick, id: EntityId },
}

impl Change {
    pub fn entity_id(&self) -> EntityId {
        match self {
            Change::Create { entity, .. } => entity.id(),
            Change::Update { entity, .. } => entity.id(),
            Change::Delete { id, .. } => *id,
        }
    }

    pub fn tick(&self) -> Tick {
        match self {
            Change::Create { tick, .. } | Change::Update { tick, .. } | Change::Delete { tick, .. } => *tick,
        }
    }

    /// Encode into the wire form.
    ///
    /// # Errors
    ///
    /// Encode failures from the registry.
    pub fn encode(&self) -> Result<EncodedChange, EcsError> {
        Ok(match self {
            Change::Create { tick, entity } => EncodedChange::Create {
                tick: *tick,
                entity: entity.to_encoded()?,
            },
            Change::Update { tick, entity } => EncodedChange::Update {
                tick: *tick,
                entity: entity.to_encoded()?,
            },
            Change::Delete { tick, id } => EncodedChange::Delete { tick: *tick, id: *id },
        })
    }

    /// Wrap a wire change. Payloads are decoded lazily.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponentId`] if a payload references an unknown
    /// component.
    pub fn decode(registry: &Arc<ComponentRegistry>, encoded: EncodedChange) -> Result<Self, EcsError> {
        Ok(match encoded {
            EncodedChange::Create { tick, entity } => Change::Create {
                tick,
                entity: LazyEntity::for_encoded(Arc::clone(registry), entity)?,
            },
            EncodedChange::Update { tick, entity } => Change::Update {
                tick,
                entity: LazyDelta::for_encoded(Arc::clone(registry), entity)?,
            },
            EncodedChange::Delete { tick, id } => Change::Delete { tick, id },
        })
    }
}

/// Serializable form of a [`Change`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodedChange {
    Create { tick: Tick, entity: EncodedEntity },
    Update { tick: Tick, entity: EncodedEntity },
    Delete { tick: Tick, id: EntityId },
}

// ---------------------------------------------------------------------------
// Merge / apply
// ---------------------------------------------------------------------------

/// Fold `next` into the change recorded before it for the same entity.
///
/// - Creates and deletes replace whatever came before.
/// - An update on a create is folded into the create, unless it predates
///   the create, in which case it is stale and dropped.
/// - An update on a delete stands alone.
/// - Two updates merge, later opinions winning.
pub fn merge_change(prior: Option<Change>, next: Change) -> Change {
    let Some(prior) = prior else {
        return next;
    };
    match (prior, next) {
        (_, next @ (Change::Create { .. } | Change::Delete { .. })) => next,
        (
            Change::Create {
                tick: created,
                entity,
            },
            Change::Update { tick, entity: delta },
        ) => {
            if tick < created {
                tracing::debug!(entity = %entity.id(), tick, created, "dropping update older than create");
                Change::Create {
                    tick: created,
                    entity,
                }
            } else {
                Change::Create {
                    tick,
                    entity: entity.merge_delta(&delta),
                }
            }
        }
        (Change::Delete { .. }, next @ Change::Update { .. }) => next,
        (Change::Update { entity: prior, .. }, Change::Update { tick, entity }) => Change::Update {
            tick,
            entity: prior.merge(&entity),
        },
    }
}

/// Apply `change` to the stored entity, returning what should be stored
/// afterwards (`None` if the entity no longer exists).
///
/// An update to an entity that does not exist yet creates it from the
/// values the update sets.
pub fn apply_change(base: Option<LazyEntity>, change: Change) -> Option<LazyEntity> {
    match change {
        Change::Create { entity, .. } => Some(entity),
        Change::Delete { .. } => None,
        Change::Update { entity: delta, .. } => {
            let base = base.unwrap_or_else(|| LazyEntity::empty(Arc::clone(delta.registry()), delta.id()));
            Some(base.merge_delta(&delta))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
