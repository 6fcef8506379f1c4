//! Tri-state mutation overlays.
//!
//! A delta records, per component, one of three opinions ([`Slot`]):
//! no opinion (defer to the layer below), cleared, or a new value. Reads
//! walk the layers outermost first and stop at the first layer with an
//! opinion.
//!
//! [`ReadonlyDelta`] is the read side shared by every overlay, [`Delta`] the
//! write side. The concrete overlays are
//! [`PatchableEntity`](crate::patchable::PatchableEntity), which sits on a
//! base entity and records which components were read, and
//! [`DeltaPatch`](crate::patch::DeltaPatch), which sits on another overlay.
//!
//! Typed access goes through [`DeltaExt`] and [`DeltaMutExt`], implemented
//! once for every overlay.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::component::{Component, ComponentId, ComponentValue};
use crate::entity::{ConcreteEntity, EntityId};
use crate::patch::DeltaPatch;
use crate::registry::ComponentRegistry;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// One layer's knowledge of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot<T> {
    /// No opinion: defer to the layer below.
    Unset,
    /// The component is absent, whatever the layers below say.
    Cleared,
    /// The component has this value, whatever the layers below say.
    Value(T),
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot::Unset
    }
}

impl<T> Slot<T> {
    /// Build a slot from the nested-option encoding used by maps:
    /// `None` is unset, `Some(None)` cleared, `Some(Some(v))` a value.
    pub fn from_opinion(opinion: Option<Option<T>>) -> Self {
        match opinion {
            None => Slot::Unset,
            Some(None) => Slot::Cleared,
            Some(Some(value)) => Slot::Value(value),
        }
    }

    /// The inverse of [`from_opinion`](Self::from_opinion).
    pub fn into_opinion(self) -> Option<Option<T>> {
        match self {
            Slot::Unset => None,
            Slot::Cleared => Some(None),
            Slot::Value(value) => Some(Some(value)),
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Slot::Unset)
    }

    pub fn is_cleared(&self) -> bool {
        matches!(self, Slot::Cleared)
    }

    /// Whether this slot holds an opinion (cleared or a value).
    pub fn is_set(&self) -> bool {
        !self.is_unset()
    }

    /// The value, if the slot holds one.
    pub fn value(self) -> Option<T> {
        match self {
            Slot::Value(value) => Some(value),
            Slot::Unset | Slot::Cleared => None,
        }
    }

    pub fn as_ref(&self) -> Slot<&T> {
        match self {
            Slot::Unset => Slot::Unset,
            Slot::Cleared => Slot::Cleared,
            Slot::Value(value) => Slot::Value(value),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Slot<U> {
        match self {
            Slot::Unset => Slot::Unset,
            Slot::Cleared => Slot::Cleared,
            Slot::Value(value) => Slot::Value(f(value)),
        }
    }

    /// Resolve against the layer below: keep this slot's opinion, or ask
    /// `below` when there is none.
    pub fn or_else(self, below: impl FnOnce() -> Option<T>) -> Option<T> {
        match self {
            Slot::Unset => below(),
            Slot::Cleared => None,
            Slot::Value(value) => Some(value),
        }
    }
}

// ---------------------------------------------------------------------------
// DeltaMap
// ---------------------------------------------------------------------------

/// The pending slots of one overlay.
///
/// Keys absent from the map are [`Slot::Unset`]; `None` values are
/// [`Slot::Cleared`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaMap {
    slots: BTreeMap<ComponentId, Option<ComponentValue>>,
}

impl DeltaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, id: ComponentId) -> Slot<&ComponentValue> {
        Slot::from_opinion(self.slots.get(&id).map(Option::as_ref))
    }

    /// Whether this map holds an opinion about `id`.
    pub fn contains(&self, id: ComponentId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn set(&mut self, id: ComponentId, value: ComponentValue) {
        self.slots.insert(id, Some(value));
    }

    pub fn clear(&mut self, id: ComponentId) {
        self.slots.insert(id, None);
    }

    /// Drop the opinion about `id`, returning what it was.
    pub fn unset(&mut self, id: ComponentId) -> Slot<ComponentValue> {
        Slot::from_opinion(self.slots.remove(&id))
    }

    /// Mutable access to the value in slot `id`, filling an unset or cleared
    /// slot with `seed()` first.
    pub fn value_mut_or_insert_with(
        &mut self,
        id: ComponentId,
        seed: impl FnOnce() -> ComponentValue,
    ) -> &mut ComponentValue {
        self.slots.entry(id).or_insert(None).get_or_insert_with(seed)
    }

    /// Overwrite this map's slots with every opinion in `other`.
    pub fn extend(&mut self, other: DeltaMap) {
        self.slots.extend(other.slots);
    }

    /// Move all slots out, leaving this map empty.
    pub fn take(&mut self) -> DeltaMap {
        std::mem::take(self)
    }

    /// Keep only the slots for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(ComponentId, Option<&ComponentValue>) -> bool) {
        self.slots.retain(|id, value| keep(*id, value.as_ref()));
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Ids with an opinion, ascending.
    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.slots.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ComponentId, Option<&ComponentValue>)> {
        self.slots.iter().map(|(id, value)| (*id, value.as_ref()))
    }

    pub fn into_inner(self) -> BTreeMap<ComponentId, Option<ComponentValue>> {
        self.slots
    }
}

impl From<BTreeMap<ComponentId, Option<ComponentValue>>> for DeltaMap {
    fn from(slots: BTreeMap<ComponentId, Option<ComponentValue>>) -> Self {
        Self { slots }
    }
}

impl FromIterator<(ComponentId, Option<ComponentValue>)> for DeltaMap {
    fn from_iter<I: IntoIterator<Item = (ComponentId, Option<ComponentValue>)>>(iter: I) -> Self {
        Self {
            slots: iter.into_iter().collect(),
        }
    }
}

/// Callback run on an overlay's pending slots right before they are
/// finished or committed.
pub type DeltaHook = Box<dyn FnMut(&mut DeltaMap) + Send>;

pub(crate) fn run_hooks(hooks: &mut [DeltaHook], delta: &mut DeltaMap) {
    for hook in hooks.iter_mut() {
        hook(delta);
    }
}

// ---------------------------------------------------------------------------
// ReadonlyDelta
// ---------------------------------------------------------------------------

/// Read access to the effective state of an overlay stack.
///
/// Reads take `&mut self` because they may decode a lazy base and may record
/// the component in a read-set. The `_untracked` variants resolve the same
/// value without touching any read-set.
pub trait ReadonlyDelta {
    fn entity_id(&self) -> EntityId;

    fn registry(&self) -> &Arc<ComponentRegistry>;

    /// Whether component `id` is present after applying every layer.
    fn has_component(&mut self, id: ComponentId) -> bool;

    /// The effective value of component `id`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Propagates [`EcsError::DecodeError`] from a lazy base.
    fn component(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError>;

    fn has_component_untracked(&mut self, id: ComponentId) -> bool;

    fn component_untracked(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError>;

    /// Whether every component in `ids` is present.
    fn has_all(&mut self, ids: &[ComponentId]) -> bool {
        ids.iter().all(|id| self.has_component(*id))
    }

    /// Flatten the effective state of every registered component into a
    /// dense entity.
    ///
    /// # Errors
    ///
    /// Propagates decode failures from a lazy base.
    fn as_readonly_entity(&mut self) -> Result<ConcreteEntity, EcsError> {
        let ids: Vec<ComponentId> = self.registry().ids().collect();
        let mut entity = ConcreteEntity::new(self.entity_id());
        for id in ids {
            if let Some(value) = self.component(id)? {
                entity.insert_value(id, value.clone());
            }
        }
        Ok(entity)
    }

    /// A view of the same state whose reads are not recorded as
    /// dependencies.
    fn stale_ok(&mut self) -> StaleOk<'_, Self>
    where
        Self: Sized,
    {
        StaleOk { inner: self }
    }
}

/// Read-only view over an overlay that never records reads.
///
/// Created by [`ReadonlyDelta::stale_ok`].
pub struct StaleOk<'a, D: ?Sized> {
    inner: &'a mut D,
}

impl<D: ReadonlyDelta + ?Sized> ReadonlyDelta for StaleOk<'_, D> {
    fn entity_id(&self) -> EntityId {
        self.inner.entity_id()
    }

    fn registry(&self) -> &Arc<ComponentRegistry> {
        self.inner.registry()
    }

    fn has_component(&mut self, id: ComponentId) -> bool {
        self.inner.has_component_untracked(id)
    }

    fn component(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError> {
        self.inner.component_untracked(id)
    }

    fn has_component_untracked(&mut self, id: ComponentId) -> bool {
        self.inner.has_component_untracked(id)
    }

    fn component_untracked(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError> {
        self.inner.component_untracked(id)
    }
}

// ---------------------------------------------------------------------------
// Delta
// ---------------------------------------------------------------------------

/// Write access to an overlay.
///
/// Implementors supply the pending [`DeltaMap`] and the read path of the
/// layer below; every mutation is built on those.
pub trait Delta: ReadonlyDelta {
    /// The pending slots of this overlay.
    fn delta(&self) -> &DeltaMap;

    /// Mutable access to the pending slots.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidPatchReuse`] once the overlay has been
    /// finished or committed.
    fn delta_mut(&mut self) -> Result<&mut DeltaMap, EcsError>;

    /// Whether the pending slots may still be written.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidPatchReuse`] once the overlay has been finished or
    /// committed.
    fn ensure_writable(&self) -> Result<(), EcsError>;

    /// Read component `id` from the layer directly below this overlay.
    ///
    /// # Errors
    ///
    /// Propagates decode failures from a lazy base.
    fn base_component(&mut self, id: ComponentId) -> Result<Option<&ComponentValue>, EcsError>;

    /// Number of overlays below this one.
    fn depth(&self) -> usize;

    /// Register a hook run on the pending slots before finish or commit.
    fn add_hook(&mut self, hook: DeltaHook);

    /// Slot `id` := value.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponentId`] or [`EcsError::TypeMismatch`] if the
    /// value does not fit the registry, [`EcsError::InvalidPatchReuse`] on a
    /// sealed overlay.
    fn set_value(&mut self, id: ComponentId, value: ComponentValue) -> Result<(), EcsError> {
        self.registry().check_value(id, &value)?;
        self.delta_mut()?.set(id, value);
        Ok(())
    }

    /// Slot `id` := cleared.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponentId`] for an unregistered id,
    /// [`EcsError::InvalidPatchReuse`] on a sealed overlay.
    fn clear_id(&mut self, id: ComponentId) -> Result<(), EcsError> {
        if !self.registry().contains(id) {
            return Err(EcsError::UnknownComponentId { id });
        }
        self.delta_mut()?.clear(id);
        Ok(())
    }

    /// Mutable access to this overlay's own copy of component `id`.
    ///
    /// An unset slot is first filled with a clone of the value below (copy on
    /// write), so the base is never mutated through this path. A cleared
    /// slot, or a component absent below, starts from `default()`.
    ///
    /// # Errors
    ///
    /// Decode failures from a lazy base, [`EcsError::InvalidPatchReuse`] on
    /// a sealed overlay.
    fn mutable_value(
        &mut self,
        id: ComponentId,
        default: &dyn Fn() -> ComponentValue,
    ) -> Result<&mut ComponentValue, EcsError> {
        if !self.registry().contains(id) {
            return Err(EcsError::UnknownComponentId { id });
        }
        let seed = match self.delta().slot(id).map(|_| ()) {
            Slot::Value(()) => None,
            Slot::Cleared => Some(default()),
            Slot::Unset => Some(match self.base_component(id)? {
                Some(value) => value.clone(),
                None => default(),
            }),
        };
        let delta = self.delta_mut()?;
        Ok(delta.value_mut_or_insert_with(id, move || seed.unwrap_or_else(default)))
    }

    /// Set every component present in `other`; components absent from
    /// `other` keep whatever opinion this overlay already had.
    ///
    /// # Errors
    ///
    /// Same as [`set_value`](Self::set_value).
    fn copy_from(&mut self, other: &ConcreteEntity) -> Result<(), EcsError> {
        for (id, value) in other.iter() {
            self.set_value(id, value.clone())?;
        }
        Ok(())
    }

    /// Overwrite this overlay's slots with every opinion in `delta`.
    ///
    /// Every slot is validated before any is written, so a rejected delta
    /// leaves the overlay unchanged.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponentId`] or [`EcsError::TypeMismatch`] for a
    /// slot the registry does not accept, [`EcsError::InvalidPatchReuse`] on
    /// a sealed overlay.
    fn apply(&mut self, delta: DeltaMap) -> Result<(), EcsError> {
        let registry = self.registry();
        for (id, value) in delta.iter() {
            match value {
                Some(value) => registry.check_value(id, value)?,
                None if !registry.contains(id) => return Err(EcsError::UnknownComponentId { id }),
                None => {}
            }
        }
        self.delta_mut()?.extend(delta);
        Ok(())
    }

    /// Open a nested overlay whose base is this one.
    fn fork(&mut self) -> DeltaPatch<'_>
    where
        Self: Sized,
    {
        DeltaPatch::new(self)
    }
}

// ---------------------------------------------------------------------------
// Typed extensions
// ---------------------------------------------------------------------------

/// Typed reads for every overlay.
pub trait DeltaExt: ReadonlyDelta {
    /// The effective value of component `T`.
    ///
    /// # Errors
    ///
    /// Decode failures from a lazy base, or [`EcsError::TypeMismatch`] if the
    /// stored value is not a `T`.
    fn get<T: Component>(&mut self) -> Result<Option<&T>, EcsError> {
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

    fn has<T: Component>(&mut self) -> bool {
        self.has_component(T::component_id())
    }
}

impl<D: ReadonlyDelta + ?Sized> DeltaExt for D {}

/// Typed writes for every overlay.
pub trait DeltaMutExt: Delta {
    fn set<T: Component>(&mut self, value: T) -> Result<(), EcsError> {
        self.set_value(T::component_id(), ComponentValue::new(value))
    }

    fn clear_component<T: Component>(&mut self) -> Result<(), EcsError> {
        self.clear_id(T::component_id())
    }

    /// Copy-on-write mutable access to component `T`. See
    /// [`Delta::mutable_value`].
    fn mutable<T: Component + Default>(&mut self) -> Result<&mut T, EcsError> {
        let id = T::component_id();
        self.mutable_value(id, &|| ComponentValue::new(T::default()))?
            .downcast_mut::<T>()
            .ok_or(EcsError::TypeMismatch {
                id,
                expected: std::any::type_name::<T>(),
            })
    }
}

impl<D: Delta + ?Sized> DeltaMutExt for D {}

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

    #[test]
    fn slot_opinion_roundtrip() {
        assert_eq!(Slot::<u8>::from_opinion(None), Slot::Unset);
        assert_eq!(Slot::<u8>::from_opinion(Some(None)), Slot::Cleared);
        assert_eq!(Slot::from_opinion(Some(Some(3))), Slot::Value(3));
        assert_eq!(Slot::Value(3).into_opinion(), Some(Some(3)));
        assert_eq!(Slot::<u8>::default(), Slot::Unset);
    }

    #[test]
    fn slot_or_else_precedence() {
        assert_eq!(Slot::Unset.or_else(|| Some(1)), Some(1));
        assert_eq!(Slot::Cleared.or_else(|| Some(1)), None);
        assert_eq!(Slot::Value(2).or_else(|| Some(1)), Some(2));
    }

    #[test]
    fn delta_map_tri_state() {
        let mut map = DeltaMap::new();
        let id = ComponentId(47);
        assert!(map.slot(id).is_unset());

        map.clear(id);
        assert!(map.slot(id).is_cleared());

        map.set(id, ComponentValue::new(Health(3)));
        assert_eq!(
            map.slot(id).value().and_then(|v| v.downcast_ref::<Health>()),
            Some(&Health(3))
        );

        assert!(matches!(map.unset(id), Slot::Value(_)));
        assert!(map.is_empty());
    }

    #[test]
    fn extend_overwrites_whole_slots() {
        let mut lower = DeltaMap::new();
        lower.set(ComponentId(47), ComponentValue::new(Health(1)));
        lower.set(ComponentId(37), ComponentValue::new(Health(2)));

        let mut upper = DeltaMap::new();
        upper.clear(ComponentId(47));

        lower.extend(upper);
        assert!(lower.slot(ComponentId(47)).is_cleared());
        assert!(matches!(lower.slot(ComponentId(37)), Slot::Value(_)));
    }

    #[test]
    fn value_mut_fills_cleared_slot() {
        let mut map = DeltaMap::new();
        map.clear(ComponentId(47));
        let value = map.value_mut_or_insert_with(ComponentId(47), || ComponentValue::new(Health(9)));
        value.downcast_mut::<Health>().unwrap().0 += 1;
        assert_eq!(
            map.slot(ComponentId(47)).value().unwrap(),
            &ComponentValue::new(Health(10))
        );
    }

    #[test]
    fn hooks_run_in_order() {
        let mut hooks: Vec<DeltaHook> = vec![
            Box::new(|d: &mut DeltaMap| d.set(ComponentId(47), ComponentValue::new(Health(1)))),
            Box::new(|d: &mut DeltaMap| d.clear(ComponentId(47))),
        ];
        let mut map = DeltaMap::new();
        run_hooks(&mut hooks, &mut map);
        assert!(map.slot(ComponentId(47)).is_cleared());
    }
}
