//! Strata ECS -- entity/component delta storage.
//!
//! An entity is a numeric id plus a sparse set of typed components. This
//! crate provides the in-memory representation those entities live in and
//! the mutation-tracking contract built on top of it:
//!
//! - [`ComponentRegistry`](registry::ComponentRegistry): stable id / name /
//!   codec table for every component type.
//! - [`EncodedEntity`](snapshot::EncodedEntity): the cold, encoded form.
//! - [`LazyEntity`](lazy::LazyEntity): decodes each component at most once,
//!   on first access.
//! - [`PatchableEntity`](patchable::PatchableEntity): a tri-state overlay
//!   (unset / cleared / value) over a base entity that records which
//!   components were read.
//! - [`DeltaPatch`](patch::DeltaPatch): an overlay over another overlay,
//!   committed into its parent or discarded.
//! - [`Change`](change::Change) and [`ChangeLog`](changelog::ChangeLog): the
//!   stream of finished changes handed to replication and persistence.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use strata_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { v: [f64; 3] }
//!
//! impl Component for Position {
//!     const ID: u32 = 54;
//!     const NAME: &'static str = "position";
//! }
//!
//! let mut registry = ComponentRegistry::new();
//! registry.register::<Position>().unwrap();
//! let registry = Arc::new(registry);
//!
//! let base = ConcreteEntity::new(EntityId::new(7)).with(Position { v: [0.0; 3] });
//! let mut entity = PatchableEntity::new(Arc::clone(&registry), base);
//!
//! let mut patch = entity.fork();
//! patch.mutable::<Position>().unwrap().v[0] = 1.0;
//! assert!(patch.commit().unwrap());
//!
//! let changes = entity.finish().unwrap().unwrap();
//! assert_eq!(changes.len(), 1);
//! assert!(entity.read_component_ids().contains(&Position::component_id()));
//! ```

#![deny(unsafe_code)]

pub mod change;
pub mod changelog;
pub mod changeset;
pub mod component;
pub mod config;
pub mod delta;
pub mod entity;
pub mod lazy;
pub mod patch;
pub mod patchable;
pub mod registry;
pub mod snapshot;
pub mod source;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by storage operations.
///
/// All of them are local to the call that raised them; none leaves shared
/// state half-updated.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// Encoded bytes of one component did not match its schema.
    #[error("failed to decode component '{name}' ({id}): {details}")]
    DecodeError {
        id: component::ComponentId,
        name: String,
        details: String,
    },

    /// A component value could not be encoded.
    #[error("failed to encode component '{name}' ({id}): {details}")]
    EncodeError {
        id: component::ComponentId,
        name: String,
        details: String,
    },

    /// A component id is not in the registry.
    #[error("component id {id} is not registered")]
    UnknownComponentId { id: component::ComponentId },

    /// An overlay was written, finished or committed after being sealed.
    #[error("overlay for entity {entity} has already been finished or committed")]
    InvalidPatchReuse { entity: entity::EntityId },

    /// A component id or name is registered twice, or reuses a retired id.
    #[error("component '{name}' ({id}) collides with an existing or retired registration")]
    DuplicateComponent {
        id: component::ComponentId,
        name: String,
    },

    /// A persisted schema disagrees with the registry.
    #[error("schema mismatch for component {id}: {details}")]
    SchemaMismatch {
        id: component::ComponentId,
        details: String,
    },

    /// A typed accessor asked for a type other than the registered one.
    #[error("component {id} is registered as {expected}")]
    TypeMismatch {
        id: component::ComponentId,
        expected: &'static str,
    },

    /// A snapshot document could not be serialized or parsed as a whole.
    #[error("invalid snapshot document: {details}")]
    InvalidSnapshot {
        entity: Option<entity::EntityId>,
        details: String,
    },

    /// Configuration could not be parsed.
    #[error("invalid configuration: {details}")]
    InvalidConfig { details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::change::{apply_change, merge_change, Change, EncodedChange, Tick};
    pub use crate::changelog::ChangeLog;
    pub use crate::changeset::ChangeSet;
    pub use crate::component::{Component, ComponentId, ComponentValue};
    pub use crate::config::EcsConfig;
    pub use crate::delta::{Delta, DeltaExt, DeltaHook, DeltaMap, DeltaMutExt, ReadonlyDelta, Slot};
    pub use crate::entity::{ConcreteEntity, EntityId};
    pub use crate::lazy::{LazyDelta, LazyEntity};
    pub use crate::patch::DeltaPatch;
    pub use crate::patchable::PatchableEntity;
    pub use crate::registry::{ComponentInfo, ComponentRegistry, SchemaEntry};
    pub use crate::snapshot::EncodedEntity;
    pub use crate::source::{EntityBase, EntitySource, Tracked};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
