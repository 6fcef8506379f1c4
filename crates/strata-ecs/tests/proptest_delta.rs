//! Property tests for overlay composition.
//!
//! These tests generate random stacks of set / clear / no-op layers and
//! random change sets, and check the overlays against an eager reference
//! model that resolves every layer up front.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use strata_ecs::prelude::*;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Position {
    v: [f32; 3],
}

impl Component for Position {
    const ID: u32 = 54;
    const NAME: &'static str = "position";
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Health {
    hp: u32,
}

impl Component for Health {
    const ID: u32 = 47;
    const NAME: &'static str = "health";
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Label {
    text: String,
}

impl Component for Label {
    const ID: u32 = 37;
    const NAME: &'static str = "label";
}

const IDS: [ComponentId; 3] = [ComponentId(54), ComponentId(47), ComponentId(37)];

fn registry() -> Arc<ComponentRegistry> {
    let mut registry = ComponentRegistry::new();
    registry.register::<Position>().unwrap();
    registry.register::<Health>().unwrap();
    registry.register::<Label>().unwrap();
    Arc::new(registry)
}

/// The value of component `IDS[slot]` derived from a small integer.
fn value(slot: usize, n: u32) -> ComponentValue {
    match slot {
        0 => ComponentValue::new(Position {
            v: [n as f32, 0.5, -(n as f32)],
        }),
        1 => ComponentValue::new(Health { hp: n }),
        _ => ComponentValue::new(Label {
            text: format!("label-{n}"),
        }),
    }
}

/// One layer's operation on one component.
#[derive(Debug, Clone, Copy)]
enum Op {
    Keep,
    Clear,
    Set(u32),
}

type Layer = [Op; 3];
type Model = [Option<u32>; 3];

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::Keep),
        1 => Just(Op::Clear),
        2 => (0..1000u32).prop_map(Op::Set),
    ]
}

fn layer_strategy() -> impl Strategy<Value = Layer> {
    [op_strategy(), op_strategy(), op_strategy()]
}

fn model_strategy() -> impl Strategy<Value = Model> {
    [
        prop::option::of(0..1000u32),
        prop::option::of(0..1000u32),
        prop::option::of(0..1000u32),
    ]
}

fn concrete(id: u64, model: &Model) -> ConcreteEntity {
    let mut entity = ConcreteEntity::new(EntityId::new(id));
    for (slot, n) in model.iter().enumerate() {
        if let Some(n) = n {
            entity.insert_value(IDS[slot], value(slot, *n));
        }
    }
    entity
}

fn apply_layer(delta: &mut dyn Delta, layer: &Layer) -> Result<(), EcsError> {
    for (slot, op) in layer.iter().enumerate() {
        match op {
            Op::Keep => {}
            Op::Clear => delta.clear_id(IDS[slot])?,
            Op::Set(n) => delta.set_value(IDS[slot], value(slot, *n))?,
        }
    }
    Ok(())
}

/// Resolve eagerly: later layers override earlier ones, then the base.
fn resolve(base: &Model, layers: &[Layer]) -> Model {
    let mut model = *base;
    for layer in layers {
        for (slot, op) in layer.iter().enumerate() {
            match op {
                Op::Keep => {}
                Op::Clear => model[slot] = None,
                Op::Set(n) => model[slot] = Some(*n),
            }
        }
    }
    model
}

fn assert_effective(delta: &mut dyn Delta, expected: &Model) -> Result<(), TestCaseError> {
    for (slot, id) in IDS.iter().enumerate() {
        let actual = delta.component(*id).unwrap().cloned();
        prop_assert_eq!(actual, expected[slot].map(|n| value(slot, n)));
        prop_assert_eq!(delta.has_component(*id), expected[slot].is_some());
    }
    Ok(())
}

/// Open one nested patch per layer, check the innermost view, then commit
/// every patch back out.
fn run_stack(delta: &mut dyn Delta, layers: &[Layer], expected: &Model) -> Result<(), TestCaseError> {
    match layers.split_first() {
        None => assert_effective(delta, expected),
        Some((layer, rest)) => {
            let mut patch = DeltaPatch::new(&mut *delta);
            apply_layer(&mut patch, layer).unwrap();
            run_stack(&mut patch, rest, expected)?;
            patch.commit().unwrap();
            Ok(())
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn precedence_matches_eager_model(
        base in model_strategy(),
        root in layer_strategy(),
        layers in prop::collection::vec(layer_strategy(), 0..6),
    ) {
        let registry = registry();
        let mut entity = PatchableEntity::new(Arc::clone(&registry), concrete(1, &base));
        apply_layer(&mut entity, &root).unwrap();

        let mut all = vec![root];
        all.extend(layers.iter().copied());
        let expected = resolve(&base, &all);

        run_stack(&mut entity, &layers, &expected)?;
        assert_effective(&mut entity, &expected)?;

        let changes = entity.finish().unwrap().unwrap_or_else(|| ChangeSet::new(EntityId::new(1)));
        prop_assert_eq!(changes.apply_to(&concrete(1, &base)), concrete(1, &expected));
    }

    #[test]
    fn lazy_merge_matches_manual_apply(
        base in model_strategy(),
        layer in layer_strategy(),
    ) {
        let registry = registry();
        let base_entity = concrete(2, &base);

        let mut changes = ChangeSet::new(EntityId::new(2));
        for (slot, op) in layer.iter().enumerate() {
            match op {
                Op::Keep => {}
                Op::Clear => { changes.components.insert(IDS[slot], None); }
                Op::Set(n) => { changes.components.insert(IDS[slot], Some(value(slot, *n))); }
            }
        }

        let lazy_base = LazyEntity::for_encoded(
            Arc::clone(&registry),
            base_entity.encode(&registry).unwrap(),
        ).unwrap();
        let delta = LazyDelta::for_encoded(
            Arc::clone(&registry),
            changes.encode(&registry).unwrap(),
        ).unwrap();

        let mut merged = lazy_base.merge_delta(&delta);
        prop_assert_eq!(merged.materialize().unwrap(), changes.apply_to(&base_entity));
    }

    #[test]
    fn read_set_holds_exactly_the_reads(
        base in model_strategy(),
        order in Just(vec![0usize, 1, 2]).prop_shuffle(),
        extra_reads in prop::collection::vec(0usize..2, 0..4),
    ) {
        let registry = registry();
        let mut entity = PatchableEntity::new(registry, concrete(3, &base));

        for step in order.into_iter().chain(extra_reads) {
            match step {
                0 => { entity.get::<Position>().unwrap(); }
                1 => { entity.has::<Health>(); }
                _ => entity.set(Label { text: "written".to_owned() }).unwrap(),
            }
        }
        // Reading back the write is served by the overlay.
        entity.get::<Label>().unwrap();

        let expected: BTreeSet<ComponentId> = [ComponentId(54), ComponentId(47)].into_iter().collect();
        prop_assert_eq!(entity.read_component_ids(), &expected);
    }

    #[test]
    fn mutable_never_touches_base(text in "[a-z]{0,12}", suffix in "[a-z]{1,8}") {
        let registry = registry();
        let base = Arc::new(ConcreteEntity::new(EntityId::new(4)).with(Label { text: text.clone() }));
        let before = base.encode(&registry).unwrap();

        let mut entity = PatchableEntity::new(Arc::clone(&registry), Arc::clone(&base));
        entity.mutable::<Label>().unwrap().text.push_str(&suffix);
        {
            let mut patch = entity.fork();
            patch.mutable::<Label>().unwrap().text.push_str(&suffix);
            patch.commit().unwrap();
        }

        prop_assert_eq!(base.encode(&registry).unwrap(), before);
        let expected = format!("{text}{suffix}{suffix}");
        prop_assert_eq!(
            entity.get::<Label>().unwrap().map(|l| l.text.clone()),
            Some(expected)
        );
    }

    #[test]
    fn finish_as_new_roundtrips(model in model_strategy()) {
        let registry = registry();
        let mut entity = PatchableEntity::new(
            Arc::clone(&registry),
            LazyEntity::empty(Arc::clone(&registry), EntityId::new(5)),
        );
        // Write in reverse id order; the result must not depend on it.
        for (slot, n) in model.iter().enumerate().rev() {
            if let Some(n) = n {
                entity.set_value(IDS[slot], value(slot, *n)).unwrap();
            }
        }

        let created = entity.finish_as_new().unwrap();
        let mut lazy = LazyEntity::for_decoded(Arc::clone(&registry), created);
        prop_assert_eq!(lazy.materialize().unwrap(), concrete(5, &model));
    }
}
