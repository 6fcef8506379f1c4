//! Per-entity accumulation of pending changes.
//!
//! The [`ChangeLog`] collects the [`Change`]s produced while a batch of
//! mutations runs and folds every change for the same entity into one with
//! [`merge_change`]. Draining it yields at most one change per entity, in
//! entity id order, ready to hand to replication or persistence.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use strata_ecs::prelude::*;
//!
//! let registry = Arc::new(ComponentRegistry::new());
//! let mut log = ChangeLog::new();
//!
//! let id = EntityId::new(4);
//! log.record(Change::Create { tick: 1, entity: LazyEntity::empty(Arc::clone(&registry), id) });
//! log.record(Change::Delete { tick: 2, id });
//!
//! assert_eq!(log.len(), 1);
//! assert!(matches!(log.get(id), Some(Change::Delete { tick: 2, .. })));
//! ```

use std::collections::BTreeMap;

use crate::change::{merge_change, Change};
use crate::component::ComponentId;
use crate::entity::EntityId;

// ---------------------------------------------------------------------------
// ChangeLog
// ---------------------------------------------------------------------------

/// Pending changes, merged per entity.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    pending: BTreeMap<EntityId, Change>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
        }
    }

    /// Record a change, merging it with whatever is already pending for the
    /// same entity.
    pub fn record(&mut self, change: Change) {
        let id = change.entity_id();
        let prior = self.pending.remove(&id);
        self.pending.insert(id, merge_change(prior, change));
    }

    /// The merged change pending for `id`.
    pub fn get(&self, id: EntityId) -> Option<&Change> {
        self.pending.get(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Ids of entities whose pending change creates the entity with, sets or
    /// clears component `id`.
    pub fn entities_altering(&self, id: ComponentId) -> impl Iterator<Item = EntityId> + '_ {
        self.pending
            .iter()
            .filter(move |(_, change)| match change {
                Change::Create { entity, .. } => entity.has(id),
                Change::Update { entity, .. } => entity.alters(id),
                Change::Delete { .. } => false,
            })
            .map(|(entity, _)| *entity)
    }

    /// Take every pending change, ordered by entity id.
    pub fn drain(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.pending).into_values().collect()
    }

    /// Drop every pending change.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
