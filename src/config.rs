//! Datastore Configuration
//!
//! Loaded from YAML; every field has a default, so an empty document is a
//! valid configuration.
//!
//! ```yaml
//! schema:
//!   table: leaves
//!   key_columns: [page, section, group, item, seq]
//!   payload_column: body
//! cache:
//!   namespace: leaves
//!   backend: memory
//!   compression:
//!     enabled: true
//!     min_size_bytes: 1024
//!     level: 3
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheSettings, CompressionConfig};
use crate::error::{Error, Result};
use crate::store::Schema;

/// Which shared cache backend to construct
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process map
    #[default]
    Memory,
    /// No shared cache; buckets live only in the engine instance
    None,
}

/// Cache section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub namespace: String,
    pub backend: BackendKind,
    pub compression: CompressionConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let settings = CacheSettings::default();
        Self {
            namespace: settings.namespace,
            backend: BackendKind::default(),
            compression: settings.compression,
        }
    }
}

impl CacheConfig {
    /// Settings handed to the bucket cache
    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            namespace: self.namespace.clone(),
            compression: self.compression.clone(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    pub schema: Schema,
    pub cache: CacheConfig,
}

impl DatastoreConfig {
    /// Parse a YAML document
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;
        if self.cache.namespace.trim().is_empty() {
            return Err(Error::Config("cache namespace is empty".into()));
        }
        if self.cache.namespace.contains('*') {
            return Err(Error::Config(format!(
                "cache namespace '{}' must not contain '*'",
                self.cache.namespace
            )));
        }
        if !(1..=12).contains(&self.cache.compression.level) {
            return Err(Error::Config(format!(
                "compression level {} is outside 1..=12",
                self.cache.compression.level
            )));
        }
        Ok(())
    }
}
