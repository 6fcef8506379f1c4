//! Lazily decoded entities and changes.
//!
//! A [`LazyEntity`] wraps an [`EncodedEntity`] (or already decoded values)
//! and decodes each component at most once, on first access. The memo lives
//! on the wrapper, so many wrappers may share the same snapshot bytes.
//!
//! A [`LazyDelta`] has the same representation but describes a change: an
//! absent component is unchanged and a tombstone means cleared. Merging a
//! delta into an entity drops tombstones; merging two deltas keeps them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::changeset::ChangeSet;
use crate::component::{Component, ComponentId, ComponentValue};
use crate::delta::Slot;
use crate::entity::{ConcreteEntity, EntityId};
use crate::patchable::PatchableEntity;
use crate::registry::ComponentRegistry;
use crate::snapshot::EncodedEntity;
use crate::source::EntitySource;
use crate::EcsError;

// ---------------------------------------------------------------------------
// LazyCore
// ---------------------------------------------------------------------------

/// Shared storage of [`LazyEntity`] and [`LazyDelta`].
///
/// A component's opinion is its `decoded` entry if there is one, otherwise
/// its `encoded` entry. `None` in either map is a tombstone.
#[derive(Clone)]
struct LazyCore {
    registry: Arc<ComponentRegistry>,
    id: EntityId,
    encoded: BTreeMap<ComponentId, Option<Arc<[u8]>>>,
    decoded: HashMap<ComponentId, Option<ComponentValue>>,
}

impl LazyCore {
    fn empty(registry: Arc<ComponentRegistry>, id: EntityId) -> Self {
        Self {
            registry,
            id,
            encoded: BTreeMap::new(),
            decoded: HashMap::new(),
        }
    }

    fn from_encoded(registry: Arc<ComponentRegistry>, snapshot: EncodedEntity) -> Result<Self, EcsError> {
        let mut encoded = BTreeMap::new();
        for (id, payload) in snapshot.components {
            if registry.is_deprecated(id) {
                tracing::debug!(entity = %snapshot.id, component_id = id.raw(), "skipping deprecated component");
                continue;
            }
            if !registry.contains(id) {
                tracing::warn!(entity = %snapshot.id, component_id = id.raw(), "snapshot references unknown component");
                return Err(EcsError::UnknownComponentId { id });
            }
            encoded.insert(id, payload);
        }
        Ok(Self {
            registry,
            id: snapshot.id,
            encoded,
            decoded: HashMap::new(),
        })
    }

    fn from_decoded(
        registry: Arc<ComponentRegistry>,
        id: EntityId,
        decoded: impl IntoIterator<Item = (ComponentId, Option<ComponentValue>)>,
    ) -> Self {
        Self {
            registry,
            id,
            encoded: BTreeMap::new(),
            decoded: decoded.into_iter().collect(),
        }
    }

    /// The kind of opinion held for `id`, without decoding.
    fn opinion(&self, id: ComponentId) -> Slot<()> {
        match self.decoded.get(&id) {
            Some(value) => Slot::from_opinion(Some(value.as_ref().map(|_| ()))),
            None => Slot::from_opinion(self.encoded.get(&id).map(|p| p.as_ref().map(|_| ()))),
        }
    }

    /// Every id with an opinion, ascending.
    fn opinion_ids(&self) -> BTreeSet<ComponentId> {
        self.encoded
            .keys()
            .chain(self.decoded.keys())
            .copied()
            .collect()
    }

    fn slot(&mut self, id: ComponentId) -> Result<Slot<&ComponentValue>, EcsError> {
        if !self.decoded.contains_key(&id) {
            match self.encoded.get(&id) {
                None => return Ok(Slot::Unset),
                Some(None) => {
                    self.decoded.insert(id, None);
                }
                Some(Some(bytes)) => {
                    let value = self.registry.decode(id, bytes)?;
                    tracing::trace!(entity = %self.id, component_id = id.raw(), "decoded component");
                    self.decoded.insert(id, Some(value));
                }
            }
        }
        Ok(Slot::from_opinion(self.decoded.get(&id).map(Option::as_ref)))
    }

    /// `self` with every opinion of `other` laid over it.
    fn merge(&self, other: &LazyCore, keep_tombstones: bool) -> LazyCore {
        let mut merged = self.clone();
        for id in other.opinion_ids() {
            merged.encoded.remove(&id);
            merged.decoded.remove(&id);
            if !keep_tombstones && other.opinion(id).is_cleared() {
                continue;
            }
            if let Some(payload) = other.encoded.get(&id) {
                merged.encoded.insert(id, payload.clone());
            }
            if let Some(value) = other.decoded.get(&id) {
                merged.decoded.insert(id, value.clone());
            }
        }
        merged
    }

    fn to_encoded(&self) -> Result<EncodedEntity, EcsError> {
        let mut snapshot = EncodedEntity::new(self.id);
        for id in self.opinion_ids() {
            // Untouched payloads pass through without a decode.
            let payload = match (self.encoded.get(&id), self.decoded.get(&id)) {
                (Some(payload), _) => payload.clone(),
                (None, Some(Some(value))) => Some(Arc::from(self.registry.encode(id, value)?)),
                (None, Some(None)) | (None, None) => None,
            };
            snapshot.components.insert(id, payload);
        }
        Ok(snapshot)
    }

    fn fmt_with(&self, name: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut decoded: Vec<_> = self.decoded.keys().copied().collect();
        decoded.sort();
        f.debug_struct(name)
            .field("id", &self.id)
            .field("components", &self.opinion_ids())
            .field("decoded", &decoded)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LazyEntity
// ---------------------------------------------------------------------------

/// An entity whose components are decoded on first access.
///
/// Cloning copies the memo, never the snapshot bytes.
#[derive(Clone)]
pub struct LazyEntity {
    core: LazyCore,
}

impl LazyEntity {
    /// Wrap an encoded snapshot. Nothing is decoded yet.
    ///
    /// Entries for retired component ids are skipped.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponentId`] if the snapshot references an id the
    /// registry does not know. The whole load fails.
    pub fn for_encoded(registry: Arc<ComponentRegistry>, snapshot: EncodedEntity) -> Result<Self, EcsError> {
        Ok(Self {
            core: LazyCore::from_encoded(registry, snapshot)?,
        })
    }

    /// Wrap an entity that is already decoded.
    pub fn for_decoded(registry: Arc<ComponentRegistry>, entity: ConcreteEntity) -> Self {
        let id = entity.id();
        let values: Vec<_> = entity.iter().map(|(cid, v)| (cid, Some(v.clone()))).collect();
        Self {
            core: LazyCore::from_decoded(registry, id, values),
        }
    }

    /// An entity with no components.
    pub fn empty(registry: Arc<ComponentRegistry>, id: EntityId) -> Self {
        Self {
            core: LazyCore::empty(registry, id),
        }
    }

    pub fn id(&self) -> EntityId {
        self.core.id
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.core.registry
    }

    /// Whether component `id` is present. Consults the snapshot without
    /// decoding the payload.
    pub fn has(&self, id: ComponentId) -> bool {
        matches!(self.core.opinion(id), Slot::Value(()))
    }

    /// Whether this entity holds any opinion (present or tombstone) about
    /// component `id`.
    pub fn alters(&self, id: ComponentId) -> bool {
        self.core.opinion(id).is_set()
    }

    /// Whether component `id` has already been decoded and memoized.
    pub fn is_decoded(&self, id: ComponentId) -> bool {
        self.core.decoded.contains_key(&id)
    }

    /// Ids of every present component, ascending.
    pub fn ids(&self) -> Vec<ComponentId> {
        self.core
            .opinion_ids()
            .into_iter()
            .filter(|id| self.has(*id))
            .collect()
    }

    /// The value of component `id`, decoding it on first access.
    ///
    /// # Errors
    ///
    /// [`EcsError::DecodeError`] if the payload is malformed. The failure is
    /// not memoized and leaves other components untouched.
    pub fn component(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError> {
        Ok(self.core.slot(id)?.value())
    }

    /// Typed access to component `T`.
    ///
    /// # Errors
    ///
    /// Decode failures, or [`EcsError::TypeMismatch`] if `T` is not the type
    /// registered for `T::ID`.
    pub fn get<T: Component>(&mut self) -> Result<Option<&T>, EcsError> {
        let id = T::component_id();
        match self.component(id)? {
            None => Ok(None),
            Some(value) => value
                .downcast_ref::<T>()
                .map(Some)
                .ok_or(EcsError::TypeMismatch {
                    id,
                    expected: std::any::type_name::<T>(),
                }),
        }
    }

    /// Decode every component into a dense entity. Tombstones are dropped.
    ///
    /// # Errors
    ///
    /// The first decode failure.
    pub fn materialize(&mut self) -> Result<ConcreteEntity, EcsError> {
        let mut entity = ConcreteEntity::new(self.id());
        for id in self.core.opinion_ids() {
            if let Slot::Value(value) = self.core.slot(id)? {
                entity.insert_value(id, value.clone());
            }
        }
        Ok(entity)
    }

    /// A new entity taking `other`'s opinion wherever it has one and this
    /// entity's otherwise. Neither input is modified and the result holds no
    /// tombstones.
    pub fn merge(&self, other: &LazyEntity) -> LazyEntity {
        Self {
            core: self.core.merge(&other.core, false),
        }
    }

    /// Apply a change: present values overwrite, tombstones remove.
    pub fn merge_delta(&self, delta: &LazyDelta) -> LazyEntity {
        Self {
            core: self.core.merge(&delta.core, false),
        }
    }

    /// Begin a mutation over this entity.
    pub fn edit(self) -> PatchableEntity {
        let registry = Arc::clone(&self.core.registry);
        PatchableEntity::new(registry, self)
    }

    /// Encode back into a snapshot. Payloads that were never replaced are
    /// passed through without decoding.
    ///
    /// # Errors
    ///
    /// Encode failures from the registry.
    pub fn to_encoded(&self) -> Result<EncodedEntity, EcsError> {
        self.core.to_encoded()
    }
}

impl fmt::Debug for LazyEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt_with("LazyEntity", f)
    }
}

impl EntitySource for LazyEntity {
    fn entity_id(&self) -> EntityId {
        self.id()
    }

    fn has_component(&mut self, id: ComponentId) -> bool {
        self.has(id)
    }

    fn component(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError> {
        LazyEntity::component(self, id)
    }

    fn present_ids(&self) -> Vec<ComponentId> {
        self.ids()
    }
}

// ---------------------------------------------------------------------------
// LazyDelta
// ---------------------------------------------------------------------------

/// A lazily decoded change to one entity.
#[derive(Clone)]
pub struct LazyDelta {
    core: LazyCore,
}

impl LazyDelta {
    /// Wrap an encoded change. Tombstones mean cleared.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponentId`] as for
    /// [`LazyEntity::for_encoded`].
    pub fn for_encoded(registry: Arc<ComponentRegistry>, snapshot: EncodedEntity) -> Result<Self, EcsError> {
        Ok(Self {
            core: LazyCore::from_encoded(registry, snapshot)?,
        })
    }

    /// Wrap a change set produced by a finished overlay.
    pub fn for_change_set(registry: Arc<ComponentRegistry>, changes: ChangeSet) -> Self {
        Self {
            core: LazyCore::from_decoded(registry, changes.entity_id, changes.components),
        }
    }

    /// A change that alters nothing.
    pub fn empty(registry: Arc<ComponentRegistry>, id: EntityId) -> Self {
        Self {
            core: LazyCore::empty(registry, id),
        }
    }

    pub fn id(&self) -> EntityId {
        self.core.id
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.core.registry
    }

    /// Whether this change sets or clears component `id`.
    pub fn alters(&self, id: ComponentId) -> bool {
        self.core.opinion(id).is_set()
    }

    pub fn is_empty(&self) -> bool {
        self.core.encoded.is_empty() && self.core.decoded.is_empty()
    }

    /// Ids this change sets or clears, ascending.
    pub fn ids(&self) -> Vec<ComponentId> {
        self.core.opinion_ids().into_iter().collect()
    }

    /// The change for component `id`, decoding it on first access.
    ///
    /// # Errors
    ///
    /// [`EcsError::DecodeError`] if the payload is malformed.
    pub fn change(&mut self, id: ComponentId) -> Result<Slot<&ComponentValue>, EcsError> {
        self.core.slot(id)
    }

    /// A new change equal to applying `self` then `other`. Tombstones are
    /// kept.
    pub fn merge(&self, other: &LazyDelta) -> LazyDelta {
        Self {
            core: self.core.merge(&other.core, true),
        }
    }

    /// Decode every slot into a [`ChangeSet`].
    ///
    /// # Errors
    ///
    /// The first decode failure.
    pub fn to_change_set(&mut self) -> Result<ChangeSet, EcsError> {
        let mut changes = ChangeSet::new(self.id());
        for id in self.core.opinion_ids() {
            match self.core.slot(id)? {
                Slot::Value(value) => {
                    changes.components.insert(id, Some(value.clone()));
                }
                Slot::Cleared => {
                    changes.components.insert(id, None);
                }
                Slot::Unset => {}
            }
        }
        Ok(changes)
    }

    /// Encode back into a snapshot with tombstones.
    ///
    /// # Errors
    ///
    /// Encode failures from the registry.
    pub fn to_encoded(&self) -> Result<EncodedEntity, EcsError> {
        self.core.to_encoded()
    }
}

impl fmt::Debug for LazyDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt_with("LazyDelta", f)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Health(u32);

    impl Component for Health {
        const ID: u32 = 47;
        const NAME: &'static str = "health";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Label(String);

    impl Component for Label {
        const ID: u32 = 37;
        const NAME: &'static str = "label";
    }

    fn registry() -> Arc<ComponentRegistry> {
        let mut reg = ComponentRegistry::new();
        reg.register::<Health>().unwrap();
        reg.register::<Label>().unwrap();
        Arc::new(reg)
    }

    fn snapshot() -> EncodedEntity {
        EncodedEntity::new(EntityId::new(5))
            .with(ComponentId(47), &b"12"[..])
            .with(ComponentId(37), &b"\"bob\""[..])
    }

    #[test]
    fn has_does_not_decode() {
        let entity = LazyEntity::for_encoded(registry(), snapshot()).unwrap();
        assert!(entity.has(ComponentId(47)));
        assert!(!entity.has(ComponentId(54)));
        assert!(!entity.is_decoded(ComponentId(47)));
    }

    #[test]
    fn get_memoizes() {
        let mut entity = LazyEntity::for_encoded(registry(), snapshot()).unwrap();
        assert_eq!(entity.get::<Health>().unwrap(), Some(&Health(12)));
        assert!(entity.is_decoded(ComponentId(47)));
        assert!(!entity.is_decoded(ComponentId(37)));
    }

    #[test]
    fn tombstone_in_entity_reads_absent() {
        let mut snap = snapshot();
        snap.insert_tombstone(ComponentId(47));
        let mut entity = LazyEntity::for_encoded(registry(), snap).unwrap();
        assert!(!entity.has(ComponentId(47)));
        assert!(entity.alters(ComponentId(47)));
        assert_eq!(entity.get::<Health>().unwrap(), None);
        assert_eq!(entity.ids(), vec![ComponentId(37)]);
    }

    #[test]
    fn materialize_drops_tombstones() {
        let mut snap = snapshot();
        snap.insert_tombstone(ComponentId(37));
        let mut entity = LazyEntity::for_encoded(registry(), snap).unwrap();
        let concrete = entity.materialize().unwrap();
        assert_eq!(concrete, ConcreteEntity::new(EntityId::new(5)).with(Health(12)));
    }

    #[test]
    fn to_encoded_passes_bytes_through() {
        let entity = LazyEntity::for_encoded(registry(), snapshot()).unwrap();
        let encoded = entity.to_encoded().unwrap();
        assert_eq!(encoded, snapshot());
        assert!(!entity.is_decoded(ComponentId(47)));
    }

    #[test]
    fn for_decoded_encodes_values() {
        let entity = LazyEntity::for_decoded(
            registry(),
            ConcreteEntity::new(EntityId::new(5)).with(Health(12)),
        );
        let encoded = entity.to_encoded().unwrap();
        assert_eq!(encoded.bytes(ComponentId(47)), Some(&b"12"[..]));
    }

    #[test]
    fn delta_merge_keeps_tombstones() {
        let reg = registry();
        let mut first = ChangeSet::new(EntityId::new(5));
        first.components.insert(ComponentId(47), Some(ComponentValue::new(Health(1))));
        let mut second = ChangeSet::new(EntityId::new(5));
        second.components.insert(ComponentId(47), None);

        let a = LazyDelta::for_change_set(Arc::clone(&reg), first);
        let b = LazyDelta::for_change_set(reg, second);
        let mut merged = a.merge(&b);
        assert!(merged.alters(ComponentId(47)));
        assert!(merged.change(ComponentId(47)).unwrap().is_cleared());
    }

    #[test]
    fn debug_lists_ids() {
        let entity = LazyEntity::for_encoded(registry(), snapshot()).unwrap();
        let text = format!("{entity:?}");
        assert!(text.starts_with("LazyEntity"));
        assert!(text.contains("ComponentId(37)"));
    }
}
