//! Runtime configuration for the storage layer.

use serde::{Deserialize, Serialize};

use crate::EcsError;

// ---------------------------------------------------------------------------
// EcsConfig
// ---------------------------------------------------------------------------

/// Configuration applied to a [`ComponentRegistry`](crate::registry::ComponentRegistry)
/// and read by every layer built on top of it.
///
/// Missing JSON fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcsConfig {
    /// Patch nesting depth at which `fork()` logs a warning. Every level adds
    /// one indirection to each read. Default: 8.
    pub patch_depth_warning: usize,

    /// Retired component ids. Snapshot entries with these ids are dropped on
    /// load; registering a live component under one of them is rejected.
    pub deprecated_components: Vec<u32>,
}

impl Default for EcsConfig {
    fn default() -> Self {
        Self {
            patch_depth_warning: 8,
            deprecated_components: Vec::new(),
        }
    }
}

impl EcsConfig {
    /// Parse a configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] if the document is not valid JSON
    /// or has fields of the wrong type.
    pub fn from_json_str(json: &str) -> Result<Self, EcsError> {
        serde_json::from_str(json).map_err(|e| EcsError::InvalidConfig {
            details: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = EcsConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EcsConfig::default());
        assert_eq!(config.patch_depth_warning, 8);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = EcsConfig::from_json_str(r#"{"deprecated_components":[36,44]}"#).unwrap();
        assert_eq!(config.deprecated_components, vec![36, 44]);
        assert_eq!(config.patch_depth_warning, 8);
    }

    #[test]
    fn malformed_document_is_rejected() {
        let err = EcsConfig::from_json_str(r#"{"patch_depth_warning":"deep"}"#).unwrap_err();
        assert!(matches!(err, EcsError::InvalidConfig { .. }));
    }
}
