//! Seeded soak test: long random sessions of nested patches over lazy
//! entities, checked step by step against an eager reference model.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use strata_ecs::prelude::*;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Health {
    hp: u32,
}

impl Component for Health {
    const ID: u32 = 47;
    const NAME: &'static str = "health";
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Armor {
    rating: u32,
}

impl Component for Armor {
    const ID: u32 = 48;
    const NAME: &'static str = "armor";
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Mana {
    points: u32,
}

impl Component for Mana {
    const ID: u32 = 49;
    const NAME: &'static str = "mana";
}

const IDS: [ComponentId; 3] = [ComponentId(47), ComponentId(48), ComponentId(49)];

fn value(slot: usize, n: u32) -> ComponentValue {
    match slot {
        0 => ComponentValue::new(Health { hp: n }),
        1 => ComponentValue::new(Armor { rating: n }),
        _ => ComponentValue::new(Mana { points: n }),
    }
}

fn numeric(slot: usize, value: &ComponentValue) -> u32 {
    let n = match slot {
        0 => value.downcast_ref::<Health>().map(|c| c.hp),
        1 => value.downcast_ref::<Armor>().map(|c| c.rating),
        _ => value.downcast_ref::<Mana>().map(|c| c.points),
    };
    n.unwrap_or(u32::MAX)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Reference model of one overlay stack: the base plus one map per layer.
struct Model {
    base: [Option<u32>; 3],
    layers: Vec<BTreeMap<usize, Option<u32>>>,
    read: BTreeSet<ComponentId>,
}

impl Model {
    fn effective(&self, slot: usize) -> Option<u32> {
        for layer in self.layers.iter().rev() {
            if let Some(opinion) = layer.get(&slot) {
                return *opinion;
            }
        }
        self.base[slot]
    }

    /// Whether a read of `slot` reaches the base.
    fn reaches_base(&self, slot: usize) -> bool {
        self.layers.iter().all(|layer| !layer.contains_key(&slot))
    }
}

/// Drive the stack one level at a time. Each level performs random reads
/// and writes, may open a child level, and then commits or discards.
fn session(delta: &mut dyn Delta, model: &mut Model, rng: &mut Pcg64, depth: usize) {
    model.layers.push(BTreeMap::new());
    let steps = rng.gen_range(1..12);
    for _ in 0..steps {
        let slot = rng.gen_range(0..3);
        match rng.gen_range(0..6) {
            0 | 1 => {
                if model.reaches_base(slot) {
                    model.read.insert(IDS[slot]);
                }
                let actual = delta.component(IDS[slot]).unwrap().map(|v| numeric(slot, v));
                assert_eq!(actual, model.effective(slot), "read slot {slot} at depth {depth}");
            }
            2 => {
                let n = rng.gen_range(0..100);
                delta.set_value(IDS[slot], value(slot, n)).unwrap();
                model.layers.last_mut().unwrap().insert(slot, Some(n));
            }
            3 => {
                delta.clear_id(IDS[slot]).unwrap();
                model.layers.last_mut().unwrap().insert(slot, None);
            }
            4 => {
                if model.reaches_base(slot) {
                    model.read.insert(IDS[slot]);
                }
                let current = model.effective(slot);
                let default = move || value(slot, 0);
                let cell = delta.mutable_value(IDS[slot], &default).unwrap();
                let next = numeric(slot, cell) + 1;
                *cell = value(slot, next);
                assert_eq!(current.unwrap_or(0) + 1, next);
                model.layers.last_mut().unwrap().insert(slot, Some(next));
            }
            _ if depth < 4 => {
                let mut patch = DeltaPatch::new(&mut *delta);
                session(&mut patch, model, rng, depth + 1);
                let committed = rng.gen_bool(0.7);
                let child = model.layers.pop().unwrap_or_default();
                if committed {
                    patch.commit().unwrap();
                    model.layers.last_mut().unwrap().extend(child);
                } else {
                    patch.discard();
                }
            }
            _ => {}
        }
    }
}

#[test]
fn random_sessions_match_reference_model() {
    init_tracing();

    let mut registry = ComponentRegistry::new();
    registry.register::<Health>().unwrap();
    registry.register::<Armor>().unwrap();
    registry.register::<Mana>().unwrap();
    let registry = Arc::new(registry);

    let mut rng = Pcg64::seed_from_u64(0x5EED_CAFE);
    for round in 0..200u64 {
        let mut base = [None; 3];
        let mut concrete = ConcreteEntity::new(EntityId::new(round));
        for (slot, cell) in base.iter_mut().enumerate() {
            if rng.gen_bool(0.6) {
                let n = rng.gen_range(0..100);
                *cell = Some(n);
                concrete.insert_value(IDS[slot], value(slot, n));
            }
        }

        let lazy = LazyEntity::for_encoded(Arc::clone(&registry), concrete.encode(&registry).unwrap()).unwrap();
        let mut entity = lazy.clone().edit();
        let mut model = Model {
            base,
            layers: Vec::new(),
            read: BTreeSet::new(),
        };

        session(&mut entity, &mut model, &mut rng, 0);

        assert_eq!(entity.read_component_ids(), &model.read, "round {round}");

        let expected: Vec<Option<u32>> = (0..3).map(|slot| model.effective(slot)).collect();
        let changes = entity.finish().unwrap().unwrap_or_else(|| ChangeSet::new(EntityId::new(round)));
        let delta = LazyDelta::for_change_set(Arc::clone(&registry), changes);
        let mut stored = lazy.merge_delta(&delta);
        for (slot, id) in IDS.iter().enumerate() {
            let actual = stored.component(*id).unwrap().map(|v| numeric(slot, v));
            assert_eq!(actual, expected[slot], "round {round} slot {slot}");
        }
    }
}
