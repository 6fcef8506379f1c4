//! Nested overlays.
//!
//! A [`DeltaPatch`] is an overlay whose base is another overlay. It borrows
//! its parent mutably for as long as it is open, so reads fall through to
//! the parent's current state (and into the parent's read-set), and
//! [`commit`](DeltaPatch::commit) folds the pending slots into the parent.
//! Dropping a patch without committing discards it.

use std::fmt;
use std::sync::Arc;

use crate::component::{ComponentId, ComponentValue};
use crate::delta::{run_hooks, Delta, DeltaHook, DeltaMap, ReadonlyDelta, Slot};
use crate::entity::EntityId;
use crate::registry::ComponentRegistry;
use crate::EcsError;

// ---------------------------------------------------------------------------
// DeltaPatch
// ---------------------------------------------------------------------------

/// An overlay over another overlay.
pub struct DeltaPatch<'p> {
    parent: &'p mut dyn Delta,
    delta: DeltaMap,
    hooks: Vec<DeltaHook>,
    depth: usize,
    committed: bool,
}

impl<'p> DeltaPatch<'p> {
    /// Open an empty patch over `parent`.
    pub fn new(parent: &'p mut dyn Delta) -> Self {
        let depth = parent.depth() + 1;
        let threshold = parent.registry().config().patch_depth_warning;
        if depth > threshold {
            tracing::warn!(
                entity = %parent.entity_id(),
                depth,
                threshold,
                "patch nesting exceeds configured depth"
            );
        }
        Self {
            parent,
            delta: DeltaMap::new(),
            hooks: Vec::new(),
            depth,
            committed: false,
        }
    }

    /// Overwrite the parent's slots with every pending slot of this patch.
    ///
    /// Hooks run first, once both this patch and its parent are known to
    /// be writable. Returns whether there was anything to apply. The patch
    /// is sealed afterwards.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidPatchReuse`] if this patch (or its parent) has
    /// already been committed or finished.
    pub fn commit(&mut self) -> Result<bool, EcsError> {
        self.ensure_writable()?;
        self.parent.ensure_writable()?;
        run_hooks(&mut self.hooks, &mut self.delta);
        let had_delta = !self.delta.is_empty();
        if had_delta {
            self.parent.delta_mut()?.extend(self.delta.take());
        }
        self.committed = true;
        Ok(had_delta)
    }

    /// Drop the patch without touching the parent. Returns whether any
    /// pending change was thrown away.
    pub fn discard(self) -> bool {
        let had_delta = !self.committed && !self.delta.is_empty();
        if had_delta {
            tracing::trace!(entity = %self.parent.entity_id(), slots = self.delta.len(), "discarding patch");
        }
        had_delta
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }
}

impl ReadonlyDelta for DeltaPatch<'_> {
    fn entity_id(&self) -> EntityId {
        self.parent.entity_id()
    }

    fn registry(&self) -> &Arc<ComponentRegistry> {
        self.parent.registry()
    }

    fn has_component(&mut self, id: ComponentId) -> bool {
        match self.delta.slot(id) {
            Slot::Value(_) => true,
            Slot::Cleared => false,
            Slot::Unset => self.parent.has_component(id),
        }
    }

    fn component(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError> {
        match self.delta.slot(id) {
            Slot::Value(value) => Ok(Some(value)),
            Slot::Cleared => Ok(None),
            Slot::Unset => self.parent.component(id),
        }
    }

    fn has_component_untracked(&mut self, id: ComponentId) -> bool {
        match self.delta.slot(id) {
            Slot::Value(_) => true,
            Slot::Cleared => false,
            Slot::Unset => self.parent.has_component_untracked(id),
        }
    }

    fn component_untracked(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError> {
        match self.delta.slot(id) {
            Slot::Value(value) => Ok(Some(value)),
            Slot::Cleared => Ok(None),
            Slot::Unset => self.parent.component_untracked(id),
        }
    }
}

impl Delta for DeltaPatch<'_> {
    fn delta(&self) -> &DeltaMap {
        &self.delta
    }

    fn delta_mut(&mut self) -> Result<&mut DeltaMap, EcsError> {
        self.ensure_writable()?;
        Ok(&mut self.delta)
    }

    fn ensure_writable(&self) -> Result<(), EcsError> {
        if self.committed {
            return Err(EcsError::InvalidPatchReuse {
                entity: self.parent.entity_id(),
            });
        }
        Ok(())
    }

    fn base_component(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError> {
        self.parent.component(id)
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn add_hook(&mut self, hook: DeltaHook) {
        self.hooks.push(hook);
    }
}

impl fmt::Debug for DeltaPatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaPatch")
            .field("entity", &self.parent.entity_id())
            .field("depth", &self.depth)
            .field("delta", &self.delta)
            .field("committed", &self.committed)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
