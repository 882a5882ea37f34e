//! Resolved table definitions, shared across requests.

use crate::definition::TableDefinition;
use log::debug;
use may::sync::RwLock;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;

type CacheKey = (String, String, bool);

// One shared cache per database URL.
static PER_DATABASE: Lazy<RwLock<HashMap<String, Arc<MetadataCache>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Cache of resolved [`TableDefinition`]s keyed by `(schema, table, include_indexes)`.
///
/// Read-mostly. Entries are only ever replaced or removed whole, so readers never see a
/// partially rebuilt definition.
pub struct MetadataCache {
    entries: RwLock<HashMap<CacheKey, Arc<TableDefinition>>>,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache").field("entries", &self.len()).finish()
    }
}

impl MetadataCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide cache for the database at `url`.
    ///
    /// Entries are keyed by schema and table only, so services on different databases
    /// must not share a cache. Every caller passing the same `url` gets the same
    /// instance, and a different `url` gets a different one.
    pub fn for_database(url: &str) -> Arc<MetadataCache> {
        if let Some(cache) = PER_DATABASE
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(url)
        {
            return Arc::clone(cache);
        }
        let mut caches = PER_DATABASE.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            caches
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(MetadataCache::new())),
        )
    }

    pub fn get(&self, schema: &str, table: &str, include_indexes: bool) -> Option<Arc<TableDefinition>> {
        let key = (schema.to_string(), table.to_string(), include_indexes);
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(&key).cloned()
    }

    /// Store `definition` under its own schema and table name.
    pub fn insert(&self, definition: TableDefinition, include_indexes: bool) -> Arc<TableDefinition> {
        let key = (
            definition.schema_name.clone(),
            definition.table_name.clone(),
            include_indexes,
        );
        let definition = Arc::new(definition);
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(key, Arc::clone(&definition));
        definition
    }

    /// Remove both the with- and without-indexes entries for a table.
    pub fn invalidate(&self, schema: &str, table: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        for include_indexes in [false, true] {
            entries.remove(&(schema.to_string(), table.to_string(), include_indexes));
        }
        debug!("Invalidated cached definitions for {}.{}", schema, table);
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
