//! The minimal set of component changes produced by a finished overlay.

use std::collections::BTreeMap;

use crate::component::{ComponentId, ComponentValue};
use crate::delta::Slot;
use crate::entity::{ConcreteEntity, EntityId};
use crate::registry::ComponentRegistry;
use crate::snapshot::EncodedEntity;
use crate::EcsError;

// ---------------------------------------------------------------------------
// ChangeSet
// ---------------------------------------------------------------------------

/// Component-level changes to one entity.
///
/// A component absent from `components` is unchanged; `None` means it was
/// cleared and `Some(value)` that it was set.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub entity_id: EntityId,
    pub components: BTreeMap<ComponentId, Option<ComponentValue>>,
}

impl ChangeSet {
    /// A change set that changes nothing.
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            components: BTreeMap::new(),
        }
    }

    /// The change recorded for component `id`.
    pub fn change(&self, id: ComponentId) -> Slot<&ComponentValue> {
        Slot::from_opinion(self.components.get(&id).map(Option::as_ref))
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Apply the changes to `base`, returning the resulting entity.
    pub fn apply_to(&self, base: &ConcreteEntity) -> ConcreteEntity {
        let mut entity = base.clone();
        for (id, change) in &self.components {
            match change {
                Some(value) => {
                    entity.insert_value(*id, value.clone());
                }
                None => {
                    entity.remove(*id);
                }
            }
        }
        entity
    }

    /// The set values as a new entity. Clears are dropped.
    pub fn into_entity(self) -> ConcreteEntity {
        let mut entity = ConcreteEntity::new(self.entity_id);
        entity.extend(
            self.components
                .into_iter()
                .filter_map(|(id, value)| value.map(|v| (id, v))),
        );
        entity
    }

    /// Encode with the registry's codec. Clears become tombstones.
    ///
    /// # Errors
    ///
    /// Encode failures from the registry.
    pub fn encode(&self, registry: &ComponentRegistry) -> Result<EncodedEntity, EcsError> {
        let mut encoded = EncodedEntity::new(self.entity_id);
        for (id, change) in &self.components {
            match change {
                Some(value) => encoded.insert(*id, registry.encode(*id, value)?),
                None => encoded.insert_tombstone(*id),
            }
        }
        Ok(encoded)
    }

    /// Render as `{"id": .., "components": {name: value | null}}` for
    /// replication and logging.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponentId`] or encode failures from the
    /// registry.
    pub fn to_json(&self, registry: &ComponentRegistry) -> Result<serde_json::Value, EcsError> {
        let mut components = serde_json::Map::new();
        for (id, change) in &self.components {
            let name = registry
                .component_name(*id)
                .ok_or(EcsError::UnknownComponentId { id: *id })?;
            let value: serde_json::Value = match change {
                Some(value) => {
                    let bytes = registry.encode(*id, value)?;
                    serde_json::from_slice(&bytes).map_err(|e| EcsError::EncodeError {
                        id: *id,
                        name: name.to_owned(),
                        details: e.to_string(),
                    })?
                }
                None => serde_json::Value::Null,
            };
            components.insert(name.to_owned(), value);
        }
        Ok(serde_json::json!({
            "id": self.entity_id,
            "components": components,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
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

    fn changes() -> ChangeSet {
        let mut changes = ChangeSet::new(EntityId::new(7));
        changes
            .components
            .insert(ComponentId(47), Some(ComponentValue::new(Health(2))));
        changes.components.insert(ComponentId(37), None);
        changes
    }

    #[test]
    fn apply_to_sets_and_removes() {
        let base = ConcreteEntity::new(EntityId::new(7))
            .with(Health(1))
            .with(Label("x".to_owned()));
        let result = changes().apply_to(&base);
        assert_eq!(result, ConcreteEntity::new(EntityId::new(7)).with(Health(2)));
    }

    #[test]
    fn into_entity_drops_clears() {
        let entity = changes().into_entity();
        assert_eq!(entity.len(), 1);
        assert_eq!(entity.get::<Health>(), Some(&Health(2)));
    }

    #[test]
    fn encode_writes_tombstones() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Health>().unwrap();
        reg.register::<Label>().unwrap();
        let encoded = changes().encode(&reg).unwrap();
        assert_eq!(encoded.payload(ComponentId(37)), Slot::Cleared);
        assert_eq!(encoded.bytes(ComponentId(47)), Some(&b"2"[..]));
    }

    #[test]
    fn json_uses_component_names() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Health>().unwrap();
        reg.register::<Label>().unwrap();
        let json = changes().to_json(&reg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 7, "components": {"health": 2, "label": null}})
        );
    }
}
