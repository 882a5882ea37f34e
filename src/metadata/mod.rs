//! Table metadata resolution.
//!
//! [`MetadataResolver::resolve`] answers "what does `schema.table` look like" from the
//! live catalog:
//!
//! 1. find out whether the actual table and its `__tmp_write_` staging table exist
//!    (from the [`MetadataRegistry`] when it knows the table, otherwise by probing)
//! 2. introspect the actual table if it exists, otherwise the staging table
//! 3. when asked and the actual table was the target, parse its index definitions
//!
//! Results are cached in a [`MetadataCache`] until DDL on the table invalidates them.

pub mod cache;
pub mod catalog;
pub mod index_parser;
pub mod registry;

pub use cache::MetadataCache;
pub use index_parser::{parse_index_definition, IndexParseError};
pub use registry::{MetadataRegistry, StagingRecord, TableRecord};

use crate::definition::{staging_name, validate_identifier, TableDefinition};
use crate::error::StagehandError;
use crate::executor::{ExecError, SqlExecutor};
use crate::sql::SqlBuilder;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Which of a table's two physical objects exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TablePresence {
    pub actual: bool,
    pub staging: bool,
}

impl TablePresence {
    pub fn any(&self) -> bool {
        self.actual || self.staging
    }
}

fn unavailable(context: String) -> impl FnOnce(ExecError) -> StagehandError {
    move |source| StagehandError::MetadataUnavailable { context, source }
}

pub struct MetadataResolver {
    builder: &'static dyn SqlBuilder,
    cache: Arc<MetadataCache>,
    registry: Arc<MetadataRegistry>,
}

impl MetadataResolver {
    /// Resolver with its own empty cache and registry. Use [`with_cache`](Self::with_cache)
    /// to share resolved definitions, e.g. with [`MetadataCache::for_database`].
    pub fn new(builder: &'static dyn SqlBuilder) -> Self {
        Self {
            builder,
            cache: Arc::new(MetadataCache::new()),
            registry: Arc::new(MetadataRegistry::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_registry(mut self, registry: Arc<MetadataRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    /// Existence of the actual and staging tables for `table`.
    pub fn probe<E: SqlExecutor + ?Sized>(
        &self,
        executor: &E,
        schema: &str,
        table: &str,
    ) -> Result<TablePresence, StagehandError> {
        if let Some(presence) = self.registry.presence(schema, table) {
            debug!("Registry presence for {}.{}: {:?}", schema, table, presence);
            return Ok(presence);
        }
        Ok(TablePresence {
            actual: self.table_exists(executor, schema, table)?,
            staging: self.table_exists(executor, schema, &staging_name(table))?,
        })
    }

    fn table_exists<E: SqlExecutor + ?Sized>(
        &self,
        executor: &E,
        schema: &str,
        table: &str,
    ) -> Result<bool, StagehandError> {
        let sql = self.builder.build_table_exists(schema, table)?;
        debug!("Probing {}.{}", schema, table);
        let context = format!("probing {schema}.{table}");
        let rows = executor.query(&sql).map_err(unavailable(context.clone()))?;
        rows.first()
            .and_then(|row| row.first())
            .and_then(|value| value.as_bool())
            .ok_or_else(|| StagehandError::MetadataUnavailable {
                context,
                source: ExecError::QueryError("existence probe returned no rows".to_string()),
            })
    }

    /// Reconstruct the definition of `schema.table` from the catalog.
    ///
    /// When only the staging table exists the result has `is_staging = true`, the
    /// staging table's (text) columns and no indexes, whatever `include_indexes` says.
    pub fn resolve<E: SqlExecutor + ?Sized>(
        &self,
        executor: &E,
        schema: &str,
        table: &str,
        include_indexes: bool,
    ) -> Result<Arc<TableDefinition>, StagehandError> {
        validate_identifier("schema", schema)?;
        validate_identifier("table", table)?;

        if let Some(cached) = self.cache.get(schema, table, include_indexes) {
            debug!("Using cached definition of {}.{}", schema, table);
            return Ok(cached);
        }

        let presence = self.probe(executor, schema, table)?;
        let target = if presence.actual {
            table.to_string()
        } else if presence.staging {
            staging_name(table)
        } else {
            return Err(StagehandError::not_found(schema, table));
        };

        let primary_keys = self.primary_keys(executor, schema, &target)?;
        let rows = executor
            .query(&catalog::columns_query(schema, &target))
            .map_err(unavailable(format!("reading columns of {schema}.{target}")))?;
        let columns = catalog::columns_from_rows(&rows, &primary_keys)
            .map_err(unavailable(format!("decoding columns of {schema}.{target}")))?;
        if columns.is_empty() {
            return Err(StagehandError::MetadataUnavailable {
                context: format!("reading columns of {schema}.{target}"),
                source: ExecError::QueryError("catalog reported no columns".to_string()),
            });
        }

        let indexes = if include_indexes && presence.actual {
            self.indexes(executor, schema, table)?
        } else {
            Vec::new()
        };

        let definition = TableDefinition {
            schema_name: schema.to_string(),
            table_name: table.to_string(),
            columns,
            indexes,
            is_staging: !presence.actual,
        };
        info!(
            "Resolved {}.{} from {} ({} columns, {} indexes)",
            schema,
            table,
            target,
            definition.columns.len(),
            definition.indexes.len()
        );
        Ok(self.cache.insert(definition, include_indexes))
    }

    fn primary_keys<E: SqlExecutor + ?Sized>(
        &self,
        executor: &E,
        schema: &str,
        table: &str,
    ) -> Result<HashSet<String>, StagehandError> {
        let context = format!("reading primary key of {schema}.{table}");
        let rows = executor
            .query(&catalog::primary_key_query(schema, table))
            .map_err(unavailable(context.clone()))?;
        rows.iter()
            .map(|row| catalog::text_field(row, "column_name"))
            .collect::<Result<HashSet<_>, _>>()
            .map_err(unavailable(context))
    }

    fn indexes<E: SqlExecutor + ?Sized>(
        &self,
        executor: &E,
        schema: &str,
        table: &str,
    ) -> Result<Vec<crate::definition::IndexDefinition>, StagehandError> {
        let rows = executor
            .query(&catalog::indexes_query(schema, table))
            .map_err(unavailable(format!("reading indexes of {schema}.{table}")))?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(definition) = row.get_str("indexdef") else {
                warn!("Skipping index row without a definition on {}.{}", schema, table);
                continue;
            };
            match parse_index_definition(definition) {
                Ok(index) => indexes.push(index),
                Err(e) => warn!("Dropping index on {}.{}: {}", schema, table, e),
            }
        }
        Ok(indexes)
    }

    /// Forget everything known about `schema.table` and its staging table.
    pub fn invalidate(&self, schema: &str, table: &str) {
        self.cache.invalidate(schema, table);
        self.registry.invalidate(schema, table);
    }

    /// Reload the registry from the catalog and drop all cached definitions.
    pub fn warm_up<E: SqlExecutor + ?Sized>(&self, executor: &E) -> Result<(), StagehandError> {
        self.registry.reload(executor)?;
        self.cache.clear();
        Ok(())
    }
}
