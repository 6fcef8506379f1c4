//! Overlays over a base entity, with read tracking.
//!
//! A [`PatchableEntity`] is where a mutation begins. It layers a
//! [`DeltaMap`] over a read-only [`EntityBase`] and records the id of every
//! component whose value had to come from the base. Reads satisfied by the
//! overlay itself are not dependencies and are not recorded.
//!
//! The overlay is single use: [`finish`](PatchableEntity::finish) hands back
//! the minimal [`ChangeSet`] and seals it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::changeset::ChangeSet;
use crate::component::{ComponentId, ComponentValue};
use crate::delta::{run_hooks, Delta, DeltaHook, DeltaMap, ReadonlyDelta, Slot};
use crate::entity::{ConcreteEntity, EntityId};
use crate::registry::ComponentRegistry;
use crate::source::{EntityBase, EntitySource, Tracked};
use crate::EcsError;

// ---------------------------------------------------------------------------
// PatchableEntity
// ---------------------------------------------------------------------------

/// A mutation overlay over a concrete or lazy base entity.
pub struct PatchableEntity {
    registry: Arc<ComponentRegistry>,
    base: Tracked<EntityBase>,
    delta: DeltaMap,
    hooks: Vec<DeltaHook>,
    touched: bool,
    finished: bool,
}

impl PatchableEntity {
    pub fn new(registry: Arc<ComponentRegistry>, base: impl Into<EntityBase>) -> Self {
        Self {
            registry,
            base: Tracked::new(base.into()),
            delta: DeltaMap::new(),
            hooks: Vec::new(),
            touched: false,
            finished: false,
        }
    }

    /// Ids of every component read from the base so far.
    pub fn read_component_ids(&self) -> &BTreeSet<ComponentId> {
        self.base.read_component_ids()
    }

    /// The read-set, for callers folding it into a larger dependency set.
    pub fn read_component_ids_mut(&mut self) -> &mut BTreeSet<ComponentId> {
        self.base.read_component_ids_mut()
    }

    pub fn base(&self) -> &EntityBase {
        self.base.inner()
    }

    pub fn into_base(self) -> EntityBase {
        self.base.into_inner()
    }

    /// Whether [`finish`](Self::finish) has been called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Replace every pending slot with a tombstone for each component present
    /// in the base, and mark every registered component as read.
    ///
    /// Unlike [`Delta::copy_from`] this is a full reset: nothing of the base
    /// shows through afterwards.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidPatchReuse`] once finished.
    pub fn clear(&mut self) -> Result<(), EcsError> {
        self.ensure_writable()?;
        let mut delta = DeltaMap::new();
        for id in self.base.present_ids() {
            delta.clear(id);
        }
        self.delta = delta;
        self.touched = true;
        let all: Vec<ComponentId> = self.registry.ids().collect();
        self.base.mark_read(all);
        Ok(())
    }

    /// Seal the overlay and return its changes.
    ///
    /// Hooks run first. Returns `None` if no slot was ever written and
    /// [`clear`](Self::clear) was never called. Otherwise every pending slot
    /// is returned, except clears of components the base never had.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidPatchReuse`] on a second call.
    pub fn finish(&mut self) -> Result<Option<ChangeSet>, EcsError> {
        self.ensure_writable()?;
        run_hooks(&mut self.hooks, &mut self.delta);
        self.finished = true;

        if !self.touched && self.delta.is_empty() {
            return Ok(None);
        }

        let entity_id = self.entity_id();
        let mut delta = self.delta.take();
        let base = self.base.inner_mut();
        delta.retain(|id, value| {
            if value.is_some() || base.has_component(id) {
                return true;
            }
            tracing::trace!(entity = %entity_id, component_id = id.raw(), "eliding clear of absent component");
            false
        });
        Ok(Some(ChangeSet {
            entity_id,
            components: delta.into_inner(),
        }))
    }

    /// Seal the overlay and fold its changes into a new entity holding only
    /// the values this overlay set.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidPatchReuse`] on a second call.
    pub fn finish_as_new(&mut self) -> Result<ConcreteEntity, EcsError> {
        let entity_id = self.entity_id();
        Ok(match self.finish()? {
            Some(changes) => changes.into_entity(),
            None => ConcreteEntity::new(entity_id),
        })
    }
}

impl ReadonlyDelta for PatchableEntity {
    fn entity_id(&self) -> EntityId {
        self.base.entity_id()
    }

    fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    fn has_component(&mut self, id: ComponentId) -> bool {
        match self.delta.slot(id) {
            Slot::Value(_) => true,
            Slot::Cleared => false,
            Slot::Unset => self.base.has_component(id),
        }
    }

    fn component(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError> {
        match self.delta.slot(id) {
            Slot::Value(value) => Ok(Some(value)),
            Slot::Cleared => Ok(None),
            Slot::Unset => self.base.component(id),
        }
    }

    fn has_component_untracked(&mut self, id: ComponentId) -> bool {
        match self.delta.slot(id) {
            Slot::Value(_) => true,
            Slot::Cleared => false,
            Slot::Unset => self.base.inner_mut().has_component(id),
        }
    }

    fn component_untracked(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError> {
        match self.delta.slot(id) {
            Slot::Value(value) => Ok(Some(value)),
            Slot::Cleared => Ok(None),
            Slot::Unset => self.base.inner_mut().component(id),
        }
    }
}

impl Delta for PatchableEntity {
    fn delta(&self) -> &DeltaMap {
        &self.delta
    }

    fn delta_mut(&mut self) -> Result<&mut DeltaMap, EcsError> {
        self.ensure_writable()?;
        self.touched = true;
        Ok(&mut self.delta)
    }

    fn ensure_writable(&self) -> Result<(), EcsError> {
        if self.finished {
            return Err(EcsError::InvalidPatchReuse {
                entity: self.entity_id(),
            });
        }
        Ok(())
    }

    fn base_component(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError> {
        self.base.component(id)
    }

    fn depth(&self) -> usize {
        0
    }

    fn add_hook(&mut self, hook: DeltaHook) {
        self.hooks.push(hook);
    }
}

impl fmt::Debug for PatchableEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchableEntity")
            .field("base", self.base.inner())
            .field("delta", &self.delta)
            .field("read_component_ids", self.base.read_component_ids())
            .field("hooks", &self.hooks.len())
            .field("touched", &self.touched)
            .field("finished", &self.finished)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
