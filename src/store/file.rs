//! File-Backed Store
//!
//! A [`MemoryStore`] whose content is written to a JSON document after every
//! mutation. Writes go to a sibling temp file which is then renamed over the
//! target, so a crash never leaves a half-written document behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Columns, Filter, MemoryStore, ResultShape, Row, Schema, Selection, Store};
use crate::error::Result;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    version: u32,
    tables: BTreeMap<String, Vec<Row>>,
}

/// Durable store persisted as one JSON document
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
    /// Serializes snapshot writes
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the document at `path`, starting empty if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let inner = MemoryStore::new();
        if path.exists() {
            let text = fs::read_to_string(&path)?;
            if !text.trim().is_empty() {
                let document: Document = serde_json::from_str(&text)?;
                let rows: usize = document.tables.values().map(Vec::len).sum();
                info!(
                    path = %path.display(),
                    version = document.version,
                    rows,
                    "Loaded store document"
                );
                inner.import(document.tables);
            }
        }
        Ok(Self {
            path,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    /// Location of the document
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        let document = Document {
            version: FORMAT_VERSION,
            tables: self.inner.export(),
        };
        let content = serde_json::to_string_pretty(&document)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &self.path)?;
        debug!(path = %self.path.display(), "Persisted store document");
        Ok(())
    }
}

impl Store for FileStore {
    fn select(
        &self,
        schema: &Schema,
        filter: &Filter,
        columns: Columns,
        shape: ResultShape,
    ) -> Result<Selection> {
        self.inner.select(schema, filter, columns, shape)
    }

    fn insert(&self, schema: &Schema, rows: &[Row]) -> Result<u64> {
        let affected = self.inner.insert(schema, rows)?;
        self.persist()?;
        Ok(affected)
    }

    fn upsert(&self, schema: &Schema, rows: &[Row]) -> Result<u64> {
        let affected = self.inner.upsert(schema, rows)?;
        self.persist()?;
        Ok(affected)
    }

    fn delete(&self, schema: &Schema, filter: &Filter) -> Result<u64> {
        let affected = self.inner.delete(schema, filter)?;
        if affected > 0 {
            self.persist()?;
        }
        Ok(affected)
    }

    fn truncate(&self, schema: &Schema) -> Result<()> {
        self.inner.truncate(schema)?;
        self.persist()
    }
}
