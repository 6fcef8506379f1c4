//! Component registration, schema metadata and the per-component codec.
//!
//! The [`ComponentRegistry`] is the static bidirectional mapping between a
//! component's numeric id, its field name and the functions that turn encoded
//! bytes into a typed value and back. It is populated once at startup and then
//! shared read-only (typically behind an `Arc`) by every entity wrapper.

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentId, ComponentValue};
use crate::config::EcsConfig;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Codec function types
// ---------------------------------------------------------------------------

/// Type-erased function turning encoded bytes into a component value.
type DecodeFn = Box<dyn Fn(&[u8]) -> Result<ComponentValue, String> + Send + Sync>;

/// Type-erased function turning a component value into encoded bytes.
type EncodeFn = Box<dyn Fn(&ComponentValue) -> Result<Vec<u8>, String> + Send + Sync>;

// ---------------------------------------------------------------------------
// ComponentInfo / SchemaEntry
// ---------------------------------------------------------------------------

/// Metadata about a registered component.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Stable schema id.
    pub id: ComponentId,
    /// Field name.
    pub name: String,
    /// Rust `TypeId` of the component type, for runtime type checks.
    pub type_id: TypeId,
    /// Rust type name, for diagnostics.
    pub type_name: &'static str,
}

/// One `(id, name)` pair of the persisted schema.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaEntry {
    /// Stable schema id.
    pub id: u32,
    /// Field name.
    pub name: String,
}

struct ComponentEntry {
    info: ComponentInfo,
    decode: DecodeFn,
    encode: EncodeFn,
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping component ids to names, Rust types and codecs.
///
/// Ids and names are unique; registering either twice is an error rather
/// than a silent overwrite, because a collision here would corrupt every
/// snapshot that references the id.
pub struct ComponentRegistry {
    /// Ordered by id so schema listings are deterministic.
    entries: BTreeMap<ComponentId, ComponentEntry>,
    by_name: HashMap<String, ComponentId>,
    by_type: HashMap<TypeId, ComponentId>,
    /// Retired ids: tolerated in snapshots, never decoded.
    deprecated: BTreeSet<ComponentId>,
    config: EcsConfig,
}

impl ComponentRegistry {
    /// Create an empty registry with default configuration.
    pub fn new() -> Self {
        Self::with_config(EcsConfig::default())
    }

    /// Create an empty registry, retiring every id listed in
    /// `config.deprecated_components`.
    pub fn with_config(config: EcsConfig) -> Self {
        let deprecated = config
            .deprecated_components
            .iter()
            .copied()
            .map(ComponentId)
            .collect();
        Self {
            entries: BTreeMap::new(),
            by_name: HashMap::new(),
            by_type: HashMap::new(),
            deprecated,
            config,
        }
    }

    /// Configuration this registry was built with.
    pub fn config(&self) -> &EcsConfig {
        &self.config
    }

    /// Register `T` using the default JSON codec.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateComponent`] if `T::ID` or `T::NAME` is
    /// already taken (or retired), or if `T` is already registered under
    /// another id.
    pub fn register<T: Component>(&mut self) -> Result<ComponentId, EcsError> {
        self.register_with_decoder::<T, _>(|bytes| {
            serde_json::from_slice::<T>(bytes).map_err(|e| e.to_string())
        })
    }

    /// Register `T` with a caller-supplied decoder. Encoding still uses the
    /// default JSON codec.
    ///
    /// This is the hook for plugging in an external wire codec.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn register_with_decoder<T, F>(&mut self, decode: F) -> Result<ComponentId, EcsError>
    where
        T: Component,
        F: Fn(&[u8]) -> Result<T, String> + Send + Sync + 'static,
    {
        let id = T::component_id();
        let type_id = TypeId::of::<T>();

        if self.entries.contains_key(&id)
            || self.deprecated.contains(&id)
            || self.by_name.contains_key(T::NAME)
            || self.by_type.contains_key(&type_id)
        {
            return Err(EcsError::DuplicateComponent {
                id,
                name: T::NAME.to_owned(),
            });
        }

        let info = ComponentInfo {
            id,
            name: T::NAME.to_owned(),
            type_id,
            type_name: std::any::type_name::<T>(),
        };
        let decode: DecodeFn = Box::new(move |bytes: &[u8]| decode(bytes).map(ComponentValue::new));
        let encode: EncodeFn = Box::new(|value: &ComponentValue| {
            let typed = value.downcast_ref::<T>().ok_or_else(|| {
                format!(
                    "expected {}, found {}",
                    std::any::type_name::<T>(),
                    value.type_name()
                )
            })?;
            serde_json::to_vec(typed).map_err(|e| e.to_string())
        });

        self.entries.insert(
            id,
            ComponentEntry {
                info,
                decode,
                encode,
            },
        );
        self.by_name.insert(T::NAME.to_owned(), id);
        self.by_type.insert(type_id, id);
        tracing::debug!(component_id = id.raw(), name = T::NAME, "registered component");
        Ok(id)
    }

    /// Retire `id`. Snapshot entries with a retired id are dropped on load.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DuplicateComponent`] if `id` belongs to a live
    /// component.
    pub fn mark_deprecated(&mut self, id: ComponentId) -> Result<(), EcsError> {
        if let Some(entry) = self.entries.get(&id) {
            return Err(EcsError::DuplicateComponent {
                id,
                name: entry.info.name.clone(),
            });
        }
        self.deprecated.insert(id);
        Ok(())
    }

    /// Whether `id` has been retired.
    pub fn is_deprecated(&self, id: ComponentId) -> bool {
        self.deprecated.contains(&id)
    }

    /// Whether `id` belongs to a live component.
    pub fn contains(&self, id: ComponentId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Look up a component id by field name.
    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    /// Look up a component's field name by id.
    pub fn component_name(&self, id: ComponentId) -> Option<&str> {
        self.entries.get(&id).map(|e| e.info.name.as_str())
    }

    /// Look up the id `T` is registered under.
    pub fn id_of<T: 'static>(&self) -> Option<ComponentId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Get the [`ComponentInfo`] for a registered id.
    pub fn info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.entries.get(&id).map(|e| &e.info)
    }

    /// Confirm that `T` is the type registered for `T::ID`.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponentId`] if the id is not registered,
    /// [`EcsError::TypeMismatch`] if another type owns it.
    pub fn check_type<T: Component>(&self) -> Result<ComponentId, EcsError> {
        let id = T::component_id();
        let entry = self
            .entries
            .get(&id)
            .ok_or(EcsError::UnknownComponentId { id })?;
        if entry.info.type_id != TypeId::of::<T>() {
            return Err(EcsError::TypeMismatch {
                id,
                expected: entry.info.type_name,
            });
        }
        Ok(id)
    }

    /// Confirm that `value` has the type registered for `id`.
    ///
    /// # Errors
    ///
    /// Same as [`check_type`](Self::check_type).
    pub fn check_value(&self, id: ComponentId, value: &ComponentValue) -> Result<(), EcsError> {
        let entry = self
            .entries
            .get(&id)
            .ok_or(EcsError::UnknownComponentId { id })?;
        if entry.info.type_id != value.value_type_id() {
            return Err(EcsError::TypeMismatch {
                id,
                expected: entry.info.type_name,
            });
        }
        Ok(())
    }

    /// Decode the encoded bytes of component `id`.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponentId`] for an unregistered id,
    /// [`EcsError::DecodeError`] when the bytes do not match the schema.
    pub fn decode(&self, id: ComponentId, bytes: &[u8]) -> Result<ComponentValue, EcsError> {
        let entry = self
            .entries
            .get(&id)
            .ok_or(EcsError::UnknownComponentId { id })?;
        (entry.decode)(bytes).map_err(|details| {
            tracing::warn!(component_id = id.raw(), name = %entry.info.name, %details, "component decode failed");
            EcsError::DecodeError {
                id,
                name: entry.info.name.clone(),
                details,
            }
        })
    }

    /// Encode a value of component `id`.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponentId`] for an unregistered id,
    /// [`EcsError::EncodeError`] when the value has the wrong type or the
    /// codec fails.
    pub fn encode(&self, id: ComponentId, value: &ComponentValue) -> Result<Vec<u8>, EcsError> {
        let entry = self
            .entries
            .get(&id)
            .ok_or(EcsError::UnknownComponentId { id })?;
        (entry.encode)(value).map_err(|details| EcsError::EncodeError {
            id,
            name: entry.info.name.clone(),
            details,
        })
    }

    /// All live component ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.entries.keys().copied()
    }

    /// Total number of live components.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no component has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the names of all registered components, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// The live schema as `(id, name)` pairs, ordered by id.
    pub fn schema(&self) -> Vec<SchemaEntry> {
        self.entries
            .values()
            .map(|e| SchemaEntry {
                id: e.info.id.raw(),
                name: e.info.name.clone(),
            })
            .collect()
    }

    /// Hex-encoded blake3 digest of the schema and the retired id set.
    ///
    /// Two registries with the same fingerprint agree on every id.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for entry in self.entries.values() {
            hasher.update(&entry.info.id.raw().to_le_bytes());
            hasher.update(entry.info.name.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(b"deprecated");
        for id in &self.deprecated {
            hasher.update(&id.raw().to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Check a previously persisted schema against this registry.
    ///
    /// Adding components is fine. Every persisted entry must either still be
    /// registered under the same id and name, or have been retired.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::SchemaMismatch`] for the first renamed, renumbered
    /// or silently removed component.
    pub fn verify_schema(&self, persisted: &[SchemaEntry]) -> Result<(), EcsError> {
        for entry in persisted {
            let id = ComponentId(entry.id);
            match self.component_name(id) {
                Some(name) if name == entry.name => {}
                Some(name) => {
                    return Err(EcsError::SchemaMismatch {
                        id,
                        details: format!("persisted as '{}', registered as '{name}'", entry.name),
                    });
                }
                None if self.is_deprecated(id) => {}
                None => {
                    let details = match self.component_id(&entry.name) {
                        Some(moved) => format!("'{}' renumbered to {moved}", entry.name),
                        None => format!("'{}' removed without being retired", entry.name),
                    };
                    return Err(EcsError::SchemaMismatch { id, details });
                }
            }
        }
        Ok(())
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.schema())
            .field("deprecated", &self.deprecated)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
