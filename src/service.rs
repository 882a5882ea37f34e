//! Public table operations: DDL, selects, staged inserts and flushes.
//!
//! Inserts go to the staging table when one exists and to the actual table otherwise.
//! They are written in chunks of `flush.batch_size` rows, one statement per chunk,
//! strictly in order. A failing chunk stops the insert; chunks already written stay
//! written, so `insert_rows` is not atomic across chunks and retries must be idempotent
//! on the caller's side.
//!
//! A flush promotes at most one batch from staging into the actual table, casting every
//! column to its declared type. See [`FlushMode`] for what happens to the promoted
//! staging rows.

use crate::config::{FlushMode, StagehandConfig};
use crate::definition::{
    validate_identifier, IndexDefinition, TableDefinition, IS_DELETED, LAST_UPDATE_DATE,
};
use crate::error::StagehandError;
use crate::executor::SqlExecutor;
use crate::metadata::{MetadataCache, MetadataRegistry, MetadataResolver, TablePresence};
use crate::query::SelectQuerySpec;
use crate::sql::{SqlBuilder, SqlDialect};
use crate::value::{GenericRow, RowValues};
use chrono::Utc;
use log::{debug, error, info};
use serde::Serialize;
use std::sync::Arc;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Timestamp format stamped into `lastUpdateDate`; parses as a PostgreSQL `TIMESTAMP`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Which physical table an insert was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteTarget {
    Staging,
    Actual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertSummary {
    pub target: WriteTarget,
    pub rows_written: usize,
    pub chunks: usize,
}

pub struct TableService<E: SqlExecutor> {
    executor: E,
    builder: &'static dyn SqlBuilder,
    resolver: MetadataResolver,
    batch_size: usize,
    flush_mode: FlushMode,
}

impl<E: SqlExecutor> TableService<E> {
    /// Service over `executor`.
    ///
    /// Resolved definitions are shared with every other service built from the same
    /// `database.url` ([`MetadataCache::for_database`]). `executor` must talk to that
    /// database; a service on another URL never sees these entries.
    pub fn new(executor: E, config: &StagehandConfig) -> Result<Self, StagehandError> {
        config.validate()?;
        let builder = SqlDialect::from_name(&config.database.dialect)?.builder();
        Ok(Self {
            executor,
            builder,
            resolver: MetadataResolver::new(builder)
                .with_cache(MetadataCache::for_database(&config.database.url)),
            batch_size: config.flush.batch_size,
            flush_mode: config.flush.mode,
        })
    }

    pub fn with_cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.resolver = self.resolver.with_cache(cache);
        self
    }

    pub fn with_registry(mut self, registry: Arc<MetadataRegistry>) -> Self {
        self.resolver = self.resolver.with_registry(registry);
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn builder(&self) -> &'static dyn SqlBuilder {
        self.builder
    }

    pub fn resolver(&self) -> &MetadataResolver {
        &self.resolver
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }

    fn execute(&self, sql: &str, context: impl FnOnce() -> String) -> Result<u64, StagehandError> {
        debug!("Executing SQL: {}", sql);
        self.executor
            .execute(sql)
            .map_err(|source| StagehandError::OperationFailed {
                context: context(),
                source,
            })
    }

    /// Create the actual table and its indexes; with `is_staging`, create the staging
    /// table first.
    ///
    /// Every statement is built before the first one runs, so an invalid definition
    /// never leaves a half-created table behind.
    pub fn create_table(&self, def: &TableDefinition) -> Result<(), StagehandError> {
        let statements = self.builder.build_table_ddl(def)?;

        info!(
            "Creating table {}.{} (staging: {}, indexes: {})",
            def.schema_name,
            def.table_name,
            def.is_staging,
            def.indexes.len()
        );
        let result = statements.iter().try_for_each(|sql| {
            self.execute(sql, || {
                format!("creating table {}.{}", def.schema_name, def.table_name)
            })
            .map(|_| ())
        });
        self.resolver.invalidate(&def.schema_name, &def.table_name);
        result
    }

    pub fn create_index(
        &self,
        schema: &str,
        table: &str,
        index: &IndexDefinition,
    ) -> Result<(), StagehandError> {
        let sql = self.builder.build_create_index(schema, table, index)?;
        info!("Creating index {} on {}.{}", index.name_for(table), schema, table);
        let result = self.execute(&sql, || format!("creating index on {schema}.{table}"));
        self.resolver.invalidate(schema, table);
        result.map(|_| ())
    }

    pub fn select(&self, spec: &SelectQuerySpec) -> Result<Vec<GenericRow>, StagehandError> {
        let sql = self.builder.build_select(spec)?;
        debug!("Executing SQL: {}", sql);
        self.executor
            .query(&sql)
            .map_err(|source| StagehandError::OperationFailed {
                context: format!("selecting from {}.{}", spec.schema_name, spec.table_name),
                source,
            })
    }

    pub fn insert_row(
        &self,
        schema: &str,
        table: &str,
        row: &RowValues,
    ) -> Result<InsertSummary, StagehandError> {
        self.insert_rows(schema, table, std::slice::from_ref(row))
    }

    /// Insert `rows` into the staging table if one exists, else into the actual table.
    ///
    /// Rows missing `lastUpdateDate` or `isDeleted` get the current UTC time and `false`.
    pub fn insert_rows(
        &self,
        schema: &str,
        table: &str,
        rows: &[RowValues],
    ) -> Result<InsertSummary, StagehandError> {
        if rows.is_empty() {
            return Err(StagehandError::invalid("Insert rows cannot be empty"));
        }
        validate_identifier("schema", schema)?;
        validate_identifier("table", table)?;

        let now = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let rows: Vec<RowValues> = rows.iter().map(|row| stamp(row, &now)).collect();
        check_columns(&rows)?;

        let presence = self.resolver.probe(&self.executor, schema, table)?;
        if !presence.any() {
            return Err(StagehandError::not_found(schema, table));
        }
        let (target, is_staging) = if presence.staging {
            (WriteTarget::Staging, true)
        } else {
            (WriteTarget::Actual, false)
        };

        let total_chunks = rows.len().div_ceil(self.batch_size);
        let mut written = 0usize;
        for (i, chunk) in rows.chunks(self.batch_size).enumerate() {
            let sql = self.builder.build_bulk_insert(schema, table, chunk, is_staging)?;
            if let Err(e) = self.execute(&sql, || {
                format!(
                    "inserting chunk {}/{} into {}.{} ({} rows committed before the failure)",
                    i + 1,
                    total_chunks,
                    schema,
                    table,
                    written
                )
            }) {
                error!("Insert into {}.{} stopped at chunk {}/{}: {}", schema, table, i + 1, total_chunks, e);
                return Err(e);
            }
            written += chunk.len();
            #[cfg(feature = "metrics")]
            METRICS.record_rows_written(chunk.len() as u64, is_staging);
        }

        info!(
            "Inserted {} rows into {}.{} ({:?}, {} chunks)",
            written, schema, table, target, total_chunks
        );
        Ok(InsertSummary {
            target,
            rows_written: written,
            chunks: total_chunks,
        })
    }

    /// Promote at most one batch of live staging rows. Returns the number of rows
    /// inserted into the actual table.
    pub fn flush(&self, schema: &str, table: &str) -> Result<u64, StagehandError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::flush_span(schema, table).entered();

        validate_identifier("schema", schema)?;
        validate_identifier("table", table)?;
        let presence = self.resolver.probe(&self.executor, schema, table)?;
        if !(presence.actual && presence.staging) {
            return Err(StagehandError::not_found(schema, table));
        }

        let def = self.resolver.resolve(&self.executor, schema, table, false)?;
        let sql = match self.flush_mode {
            FlushMode::Copy => self.builder.build_flush(&def, self.batch_size)?,
            FlushMode::Move => self.builder.build_flush_move(&def, self.batch_size)?,
        };

        info!(
            "Flushing up to {} rows from {}.{} to actual table ({:?})",
            self.batch_size, schema, table, self.flush_mode
        );
        let promoted = self.execute(&sql, || format!("flushing {schema}.{table}"))?;
        #[cfg(feature = "metrics")]
        METRICS.record_flush(promoted);
        info!("Flushed {} rows into {}.{}", promoted, schema, table);
        Ok(promoted)
    }

    /// Flush repeatedly until a flush promotes nothing. Only meaningful when flushes
    /// consume staging rows, so it is refused in [`FlushMode::Copy`].
    pub fn drain(&self, schema: &str, table: &str) -> Result<u64, StagehandError> {
        if self.flush_mode == FlushMode::Copy {
            return Err(StagehandError::UnsupportedOperation(
                "drain requires flush mode 'move'; copy-mode flushes never consume staging rows"
                    .to_string(),
            ));
        }
        let mut total = 0u64;
        loop {
            let promoted = self.flush(schema, table)?;
            if promoted == 0 {
                break;
            }
            total += promoted;
        }
        info!("Drained {} rows from {}.{}", total, schema, table);
        Ok(total)
    }

    pub fn resolve_definition(
        &self,
        schema: &str,
        table: &str,
        include_indexes: bool,
    ) -> Result<Arc<TableDefinition>, StagehandError> {
        self.resolver.resolve(&self.executor, schema, table, include_indexes)
    }

    pub fn probe(&self, schema: &str, table: &str) -> Result<TablePresence, StagehandError> {
        validate_identifier("schema", schema)?;
        validate_identifier("table", table)?;
        self.resolver.probe(&self.executor, schema, table)
    }

    /// Snapshot the catalog into the metadata registry.
    pub fn warm_up(&self) -> Result<(), StagehandError> {
        self.resolver.warm_up(&self.executor)
    }
}

/// Fill in reserved columns the caller left out.
fn stamp(row: &RowValues, now: &str) -> RowValues {
    let mut row = row.clone();
    row.entry(LAST_UPDATE_DATE.to_string())
        .or_insert_with(|| now.to_string());
    row.entry(IS_DELETED.to_string())
        .or_insert_with(|| "false".to_string());
    row
}

/// Every row must carry the first row's columns, and column names must be identifiers.
fn check_columns(rows: &[RowValues]) -> Result<(), StagehandError> {
    let Some(first) = rows.first() else {
        return Ok(());
    };
    for column in first.keys() {
        validate_identifier("column", column)?;
    }
    if let Some(position) = rows.iter().position(|row| !row.keys().eq(first.keys())) {
        return Err(StagehandError::invalid(format!(
            "row {position} does not have the same columns as the first row"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlushConfig;
    use crate::definition::ColumnDefinition;
    use crate::query::AggregationSpec;
    use crate::test_helpers::RecordingExecutor;

    fn config(batch_size: usize, mode: FlushMode) -> StagehandConfig {
        StagehandConfig {
            flush: FlushConfig { batch_size, mode },
            ..StagehandConfig::default()
        }
    }

    fn service(executor: RecordingExecutor, batch_size: usize) -> TableService<RecordingExecutor> {
        TableService::new(executor, &config(batch_size, FlushMode::Move))
            .unwrap()
            .with_cache(Arc::new(MetadataCache::new()))
    }

    fn row(pairs: &[(&str, &str)]) -> RowValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn users() -> TableDefinition {
        TableDefinition::new(
            "public",
            "users",
            vec![
                ColumnDefinition::new("id", "INT").primary_key(),
                ColumnDefinition::new("name", "TEXT").not_null(),
            ],
        )
    }

    #[test]
    fn test_create_table_plain() {
        let svc = service(RecordingExecutor::new(), 10);
        svc.create_table(&users().with_indexes(vec![IndexDefinition::new(["name"])]))
            .unwrap();

        let executed = svc.executor().executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"users\""));
        assert!(executed[1].starts_with("CREATE INDEX IF NOT EXISTS \"users_name_idx\""));
    }

    #[test]
    fn test_create_table_staged_order() {
        let svc = service(RecordingExecutor::new(), 10);
        svc.create_table(
            &users()
                .with_indexes(vec![IndexDefinition::new(["name"])])
                .staging(true),
        )
        .unwrap();

        let executed = svc.executor().executed();
        assert_eq!(executed.len(), 3);
        assert!(executed[0].contains("\"__tmp_write_users\""));
        assert!(executed[1].contains("\"public\".\"users\" ("));
        assert!(executed[2].starts_with("CREATE INDEX"));
    }

    #[test]
    fn test_create_table_invalid_runs_nothing() {
        let svc = service(RecordingExecutor::new(), 10);
        let bad = users().with_indexes(vec![IndexDefinition::new(["na me"])]);
        assert!(matches!(
            svc.create_table(&bad),
            Err(StagehandError::InvalidArgument(_))
        ));
        assert!(svc.executor().statements().is_empty());
    }

    #[test]
    fn test_create_table_failure_is_operation_failed() {
        let executor = RecordingExecutor::new();
        executor.fail_executions_matching("CREATE TABLE");
        let svc = service(executor, 10);
        let err = svc.create_table(&users()).unwrap_err();
        assert!(matches!(err, StagehandError::OperationFailed { .. }));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_insert_routes_to_actual_without_staging() {
        let executor = RecordingExecutor::new();
        executor.set_table_presence("public", "users", true, false);
        let svc = service(executor, 10);

        let summary = svc
            .insert_rows("public", "users", &[row(&[("id", "1"), ("name", "Ann")])])
            .unwrap();
        assert_eq!(summary.target, WriteTarget::Actual);
        assert_eq!(summary.rows_written, 1);
        assert_eq!(summary.chunks, 1);

        let executed = svc.executor().executed();
        assert!(executed[0].starts_with("INSERT INTO \"public\".\"users\" "));
    }

    #[test]
    fn test_insert_routes_to_staging_when_present() {
        let executor = RecordingExecutor::new();
        executor.set_table_presence("public", "users", true, true);
        let svc = service(executor, 10);

        let summary = svc
            .insert_row("public", "users", &row(&[("id", "1"), ("name", "Ann")]))
            .unwrap();
        assert_eq!(summary.target, WriteTarget::Staging);
        assert!(svc.executor().executed()[0].starts_with("INSERT INTO \"public\".\"__tmp_write_users\" "));
    }

    #[test]
    fn test_insert_stamps_reserved_columns() {
        let executor = RecordingExecutor::new();
        executor.set_table_presence("public", "users", false, true);
        let svc = service(executor, 10);

        svc.insert_rows(
            "public",
            "users",
            &[row(&[("id", "1"), ("isDeleted", "true")])],
        )
        .unwrap();
        let sql = &svc.executor().executed()[0];
        assert!(sql.contains("(\"id\", \"isDeleted\", \"lastUpdateDate\")"), "{sql}");
        // Caller-supplied tombstone wins.
        assert!(sql.contains("('1', 'true', '"), "{sql}");
    }

    #[test]
    fn test_stamp_format_parses_as_timestamp() {
        let now = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        assert!(chrono::NaiveDateTime::parse_from_str(&now, "%Y-%m-%d %H:%M:%S%.f").is_ok());
        let stamped = stamp(&row(&[("id", "1")]), &now);
        assert_eq!(stamped.get(IS_DELETED).map(String::as_str), Some("false"));
        assert_eq!(stamped.get(LAST_UPDATE_DATE), Some(&now));
    }

    #[test]
    fn test_insert_validation_happens_before_any_sql() {
        let svc = service(RecordingExecutor::new(), 10);
        assert!(matches!(
            svc.insert_rows("public", "users", &[]),
            Err(StagehandError::InvalidArgument(_))
        ));
        assert!(matches!(
            svc.insert_rows(
                "public",
                "users",
                &[row(&[("id", "1")]), row(&[("name", "x")])]
            ),
            Err(StagehandError::InvalidArgument(_))
        ));
        assert!(matches!(
            svc.insert_rows("public", "users", &[row(&[("bad key", "1")])]),
            Err(StagehandError::InvalidArgument(_))
        ));
        assert!(svc.executor().statements().is_empty());
    }

    #[test]
    fn test_insert_missing_table_is_not_found() {
        let executor = RecordingExecutor::new();
        executor.set_table_presence("public", "ghost", false, false);
        let svc = service(executor, 10);
        let err = svc
            .insert_rows("public", "ghost", &[row(&[("id", "1")])])
            .unwrap_err();
        assert!(matches!(err, StagehandError::NotFound { .. }));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_flush_requires_both_tables() {
        let executor = RecordingExecutor::new();
        executor.set_table_presence("public", "users", true, false);
        let svc = service(executor, 10);
        assert!(matches!(
            svc.flush("public", "users"),
            Err(StagehandError::NotFound { .. })
        ));
    }

    #[test]
    fn test_drain_refused_in_copy_mode() {
        let svc = TableService::new(RecordingExecutor::new(), &config(10, FlushMode::Copy)).unwrap();
        assert!(matches!(
            svc.drain("public", "users"),
            Err(StagehandError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_select_runs_built_query() {
        let executor = RecordingExecutor::new();
        executor.respond_to(
            "GROUP BY \"dept\"",
            vec![GenericRow::new().with("dept", "sales").with("n", 3i64)],
        );
        let svc = service(executor, 10);
        let spec = SelectQuerySpec::new("public", "employees")
            .columns(["dept"])
            .aggregate(AggregationSpec::new("COUNT", "*").alias("n"));

        let rows = svc.select(&spec).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("dept"), Some("sales"));
        assert_eq!(
            svc.executor().statements(),
            vec!["SELECT \"dept\", COUNT(*) AS \"n\" FROM \"public\".\"employees\" GROUP BY \"dept\""]
        );
    }

    #[test]
    fn test_unknown_dialect_rejected() {
        let mut cfg = StagehandConfig::default();
        cfg.database.dialect = "oracle".into();
        assert!(matches!(
            TableService::new(RecordingExecutor::new(), &cfg),
            Err(StagehandError::UnsupportedOperation(_))
        ));
    }
}
