//! Read-only entity sources and read tracking.
//!
//! An [`EntitySource`] is anything an overlay can sit on: a fully decoded
//! [`ConcreteEntity`] or a [`LazyEntity`]. [`EntityBase`] closes the set so a
//! patchable entity owns its base without dynamic dispatch, and
//! [`Tracked`] decorates any source with a read-set.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::component::{ComponentId, ComponentValue};
use crate::entity::{ConcreteEntity, EntityId};
use crate::lazy::LazyEntity;
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntitySource
// ---------------------------------------------------------------------------

/// A read-only view of one entity's components.
///
/// Reads take `&mut self` so lazy sources can memoize decoded values.
pub trait EntitySource {
    fn entity_id(&self) -> EntityId;

    /// Whether component `id` is present. Never decodes.
    fn has_component(&mut self, id: ComponentId) -> bool;

    /// The value of component `id`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// [`EcsError::DecodeError`] if a lazy payload is malformed.
    fn component(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError>;

    /// Ids of every present component, ascending.
    fn present_ids(&self) -> Vec<ComponentId>;
}

impl EntitySource for ConcreteEntity {
    fn entity_id(&self) -> EntityId {
        self.id()
    }

    fn has_component(&mut self, id: ComponentId) -> bool {
        self.contains(id)
    }

    fn component(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError> {
        Ok(ConcreteEntity::component(self, id))
    }

    fn present_ids(&self) -> Vec<ComponentId> {
        self.ids().collect()
    }
}

// ---------------------------------------------------------------------------
// EntityBase
// ---------------------------------------------------------------------------

/// The base a [`PatchableEntity`](crate::patchable::PatchableEntity) sits on.
#[derive(Debug, Clone)]
pub enum EntityBase {
    /// A decoded entity, shared read-only.
    Concrete(Arc<ConcreteEntity>),
    /// An encoded entity decoded on demand.
    Lazy(LazyEntity),
}

impl EntitySource for EntityBase {
    fn entity_id(&self) -> EntityId {
        match self {
            EntityBase::Concrete(entity) => entity.id(),
            EntityBase::Lazy(entity) => entity.id(),
        }
    }

    fn has_component(&mut self, id: ComponentId) -> bool {
        match self {
            EntityBase::Concrete(entity) => entity.contains(id),
            EntityBase::Lazy(entity) => entity.has(id),
        }
    }

    fn component(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError> {
        match self {
            EntityBase::Concrete(entity) => Ok(entity.component(id)),
            EntityBase::Lazy(entity) => entity.component(id),
        }
    }

    fn present_ids(&self) -> Vec<ComponentId> {
        match self {
            EntityBase::Concrete(entity) => entity.ids().collect(),
            EntityBase::Lazy(entity) => entity.ids(),
        }
    }
}

impl From<ConcreteEntity> for EntityBase {
    fn from(entity: ConcreteEntity) -> Self {
        EntityBase::Concrete(Arc::new(entity))
    }
}

impl From<Arc<ConcreteEntity>> for EntityBase {
    fn from(entity: Arc<ConcreteEntity>) -> Self {
        EntityBase::Concrete(entity)
    }
}

impl From<LazyEntity> for EntityBase {
    fn from(entity: LazyEntity) -> Self {
        EntityBase::Lazy(entity)
    }
}

// ---------------------------------------------------------------------------
// Tracked
// ---------------------------------------------------------------------------

/// Wraps a source and records the id of every component read through it.
///
/// Both [`has_component`](EntitySource::has_component) and
/// [`component`](EntitySource::component) count as reads. Going through
/// [`inner_mut`](Self::inner_mut) bypasses the record.
#[derive(Debug, Clone)]
pub struct Tracked<S> {
    inner: S,
    read_component_ids: BTreeSet<ComponentId>,
}

impl<S> Tracked<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            read_component_ids: BTreeSet::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Untracked access to the wrapped source.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Ids read since creation.
    pub fn read_component_ids(&self) -> &BTreeSet<ComponentId> {
        &self.read_component_ids
    }

    pub fn read_component_ids_mut(&mut self) -> &mut BTreeSet<ComponentId> {
        &mut self.read_component_ids
    }

    /// Record `ids` as read without reading them.
    pub fn mark_read(&mut self, ids: impl IntoIterator<Item = ComponentId>) {
        self.read_component_ids.extend(ids);
    }
}

impl<S: EntitySource> EntitySource for Tracked<S> {
    fn entity_id(&self) -> EntityId {
        self.inner.entity_id()
    }

    fn has_component(&mut self, id: ComponentId) -> bool {
        self.read_component_ids.insert(id);
        self.inner.has_component(id)
    }

    fn component(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError> {
        self.read_component_ids.insert(id);
        self.inner.component(id)
    }

    fn present_ids(&self) -> Vec<ComponentId> {
        self.inner.present_ids()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
