//! SQL text generation.
//!
//! A [`SqlBuilder`] turns table, index and query descriptions into statement text for
//! one backend. Builders are pure: no I/O, no shared state. [`SqlDialect`] selects the
//! builder for a configured dialect name; Postgres is the only implemented backend.

pub mod postgres;
pub mod quote;

use crate::definition::{IndexDefinition, TableDefinition};
use crate::error::StagehandError;
use crate::query::SelectQuerySpec;
use crate::value::RowValues;
use std::fmt;

pub use postgres::PostgresSqlBuilder;

/// Statement builder for one SQL dialect.
///
/// Every method validates the identifiers it is handed before producing text, so a
/// builder can be used directly without going through [`TableService`](crate::TableService).
pub trait SqlBuilder: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    /// `CREATE TABLE IF NOT EXISTS` for the actual table, reserved columns appended.
    fn build_create_table(&self, def: &TableDefinition) -> Result<String, StagehandError>;

    /// Same shape as [`build_create_table`](Self::build_create_table), every column text-typed,
    /// named `__tmp_write_<table>`.
    fn build_create_staging_table(&self, def: &TableDefinition) -> Result<String, StagehandError>;

    fn build_create_index(
        &self,
        schema: &str,
        table: &str,
        index: &IndexDefinition,
    ) -> Result<String, StagehandError>;

    /// One statement per index, in input order.
    fn build_all_create_indexes(
        &self,
        schema: &str,
        table: &str,
        indexes: &[IndexDefinition],
    ) -> Result<Vec<String>, StagehandError> {
        indexes
            .iter()
            .map(|index| self.build_create_index(schema, table, index))
            .collect()
    }

    /// All DDL for `def` in execution order: the staging table when `is_staging` is
    /// set, then the actual table, then its indexes.
    fn build_table_ddl(&self, def: &TableDefinition) -> Result<Vec<String>, StagehandError> {
        let mut statements = Vec::with_capacity(def.indexes.len() + 2);
        if def.is_staging {
            statements.push(self.build_create_staging_table(def)?);
        }
        statements.push(self.build_create_table(def)?);
        statements.extend(self.build_all_create_indexes(
            &def.schema_name,
            &def.table_name,
            &def.indexes,
        )?);
        Ok(statements)
    }

    fn build_select(&self, spec: &SelectQuerySpec) -> Result<String, StagehandError>;

    /// Multi-row insert; every row must carry the first row's column set.
    fn build_bulk_insert(
        &self,
        schema: &str,
        table: &str,
        rows: &[RowValues],
        is_staging: bool,
    ) -> Result<String, StagehandError>;

    fn build_insert(
        &self,
        schema: &str,
        table: &str,
        row: &RowValues,
        is_staging: bool,
    ) -> Result<String, StagehandError> {
        self.build_bulk_insert(schema, table, std::slice::from_ref(row), is_staging)
    }

    /// Copy at most `batch_size` live staging rows into the actual table. Staging rows are
    /// left in place.
    fn build_flush(&self, def: &TableDefinition, batch_size: usize) -> Result<String, StagehandError>;

    /// Move at most `batch_size` live staging rows into the actual table: copied rows are
    /// deleted from staging in the same statement.
    fn build_flush_move(
        &self,
        def: &TableDefinition,
        batch_size: usize,
    ) -> Result<String, StagehandError>;

    /// Single-row, single-column boolean probe.
    fn build_table_exists(&self, schema: &str, table: &str) -> Result<String, StagehandError>;
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    #[default]
    Postgres,
}

static POSTGRES: PostgresSqlBuilder = PostgresSqlBuilder;

impl SqlDialect {
    /// Case-insensitive lookup by configured name.
    pub fn from_name(name: &str) -> Result<Self, StagehandError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(SqlDialect::Postgres),
            other => Err(StagehandError::UnsupportedOperation(format!(
                "Unsupported SQL dialect: {other}"
            ))),
        }
    }

    pub fn builder(self) -> &'static dyn SqlBuilder {
        match self {
            SqlDialect::Postgres => &POSTGRES,
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::Postgres => f.write_str("postgres"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_name() {
        assert_eq!(SqlDialect::from_name("postgres").unwrap(), SqlDialect::Postgres);
        assert_eq!(SqlDialect::from_name(" PostgreSQL ").unwrap(), SqlDialect::Postgres);
        assert!(matches!(
            SqlDialect::from_name("mysql"),
            Err(StagehandError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_builder_reports_its_dialect() {
        let builder = SqlDialect::Postgres.builder();
        assert_eq!(builder.dialect(), SqlDialect::Postgres);
        assert_eq!(SqlDialect::default().to_string(), "postgres");
    }

    #[test]
    fn test_all_indexes_empty_input() {
        let sql = SqlDialect::Postgres
            .builder()
            .build_all_create_indexes("public", "users", &[])
            .unwrap();
        assert!(sql.is_empty());
    }
}
