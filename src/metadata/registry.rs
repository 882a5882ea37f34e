//! Precomputed table metadata.
//!
//! A snapshot of which actual and staging tables exist, taken from the catalog in one
//! query. Records are dropped when DDL goes through the service; anything missing from
//! the snapshot is resolved by live probes instead.

use super::catalog::{all_columns_query, text_field};
use super::TablePresence;
use crate::definition::{staging_name, STAGING_PREFIX};
use crate::error::StagehandError;
use crate::executor::{ExecError, SqlExecutor};
use crate::value::GenericRow;
use log::{debug, info};
use may::sync::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

type Key = (String, String);

fn key(schema: &str, table: &str) -> Key {
    (schema.to_string(), table.to_string())
}

/// An actual table and whether its staging table existed at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRecord {
    pub schema: String,
    pub table: String,
    pub has_staging: bool,
    pub columns: Vec<String>,
}

/// A `__tmp_write_` table, linked to the actual table it stages for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingRecord {
    pub schema: String,
    pub staging_table: String,
    pub original_table: String,
    pub columns: Vec<String>,
}

#[derive(Default)]
struct Snapshot {
    tables: HashMap<Key, TableRecord>,
    /// Keyed by (schema, original table)
    staging: HashMap<Key, StagingRecord>,
}

pub struct MetadataRegistry {
    snapshot: RwLock<Snapshot>,
}

impl Default for MetadataRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetadataRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataRegistry")
            .field("tables", &self.table_count())
            .field("staging", &self.staging_count())
            .finish()
    }
}

impl MetadataRegistry {
    /// An empty registry; every lookup falls through to live probes.
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    /// Snapshot the catalog.
    pub fn load<E: SqlExecutor + ?Sized>(executor: &E) -> Result<Self, StagehandError> {
        let registry = Self::new();
        registry.reload(executor)?;
        Ok(registry)
    }

    /// Replace the snapshot with a fresh one from the catalog.
    pub fn reload<E: SqlExecutor + ?Sized>(&self, executor: &E) -> Result<(), StagehandError> {
        let rows = executor
            .query(&all_columns_query())
            .map_err(|source| StagehandError::MetadataUnavailable {
                context: "loading table metadata".to_string(),
                source,
            })?;

        let columns = rows
            .iter()
            .map(column_triple)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| StagehandError::MetadataUnavailable {
                context: "decoding table metadata".to_string(),
                source,
            })?;

        let snapshot = Self::classify(columns);
        info!(
            "Loaded metadata for {} tables and {} staging tables",
            snapshot.tables.len(),
            snapshot.staging.len()
        );
        *self.write() = snapshot;
        Ok(())
    }

    /// Build a registry from `(schema, table, column)` triples.
    pub fn from_columns<I>(columns: I) -> Self
    where
        I: IntoIterator<Item = (String, String, String)>,
    {
        Self {
            snapshot: RwLock::new(Self::classify(columns)),
        }
    }

    fn classify<I>(columns: I) -> Snapshot
    where
        I: IntoIterator<Item = (String, String, String)>,
    {
        // Columns keep their ordinal order within each table.
        let mut grouped: BTreeMap<Key, Vec<String>> = BTreeMap::new();
        for (schema, table, column) in columns {
            grouped.entry((schema, table)).or_default().push(column);
        }

        let mut snapshot = Snapshot::default();
        for ((schema, table), cols) in &grouped {
            if let Some(original) = table.strip_prefix(STAGING_PREFIX) {
                snapshot.staging.insert(
                    key(schema, original),
                    StagingRecord {
                        schema: schema.clone(),
                        staging_table: table.clone(),
                        original_table: original.to_string(),
                        columns: cols.clone(),
                    },
                );
            }
        }
        for ((schema, table), cols) in grouped {
            if table.starts_with(STAGING_PREFIX) {
                continue;
            }
            let has_staging = snapshot.staging.contains_key(&key(&schema, &table));
            snapshot.tables.insert(
                key(&schema, &table),
                TableRecord {
                    schema,
                    table,
                    has_staging,
                    columns: cols,
                },
            );
        }
        snapshot
    }

    pub fn table(&self, schema: &str, table: &str) -> Option<TableRecord> {
        self.read().tables.get(&key(schema, table)).cloned()
    }

    /// Staging record for the actual table name `table`.
    pub fn staging(&self, schema: &str, table: &str) -> Option<StagingRecord> {
        self.read().staging.get(&key(schema, table)).cloned()
    }

    /// Which of the actual and staging tables exist, if the snapshot knows the table.
    pub fn presence(&self, schema: &str, table: &str) -> Option<TablePresence> {
        let snapshot = self.read();
        let k = key(schema, table);
        match (snapshot.tables.get(&k), snapshot.staging.contains_key(&k)) {
            (Some(record), _) => Some(TablePresence {
                actual: true,
                staging: record.has_staging,
            }),
            (None, true) => Some(TablePresence {
                actual: false,
                staging: true,
            }),
            (None, false) => None,
        }
    }

    /// Drop everything recorded for `table` and its staging table.
    pub fn invalidate(&self, schema: &str, table: &str) {
        let mut snapshot = self.write();
        let k = key(schema, table);
        let removed = snapshot.tables.remove(&k).is_some() | snapshot.staging.remove(&k).is_some();
        if removed {
            debug!(
                "Dropped registry records for {}.{} and {}",
                schema,
                table,
                staging_name(table)
            );
        }
    }

    pub fn table_count(&self) -> usize {
        self.read().tables.len()
    }

    pub fn staging_count(&self) -> usize {
        self.read().staging.len()
    }

    pub fn is_empty(&self) -> bool {
        let snapshot = self.read();
        snapshot.tables.is_empty() && snapshot.staging.is_empty()
    }

    fn read(&self) -> may::sync::RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> may::sync::RwLockWriteGuard<'_, Snapshot> {
        self.snapshot.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn column_triple(row: &GenericRow) -> Result<(String, String, String), ExecError> {
    Ok((
        text_field(row, "table_schema")?,
        text_field(row, "table_name")?,
        text_field(row, "column_name")?,
    ))
}
