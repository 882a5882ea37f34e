//! SQL execution boundary.
//!
//! The core never talks to a driver directly: every generated statement goes through
//! [`SqlExecutor`], which has exactly two capabilities, run a statement without a result
//! set and run a query returning [`GenericRow`]s. [`MayPostgresExecutor`] is the
//! production implementation over `may_postgres`.

use crate::value::{GenericRow, SqlValue};
use may_postgres::types::Type;
use may_postgres::{Client, Error as PostgresError, Row};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Executor error type
#[derive(Debug)]
pub enum ExecError {
    /// `PostgreSQL` error from `may_postgres`
    PostgresError(PostgresError),
    /// Query execution error
    QueryError(String),
    /// Row decoding error
    ParseError(String),
    /// Other execution errors
    Other(String),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::PostgresError(e) => write!(f, "PostgreSQL error: {e}"),
            ExecError::QueryError(s) => write!(f, "Query error: {s}"),
            ExecError::ParseError(s) => write!(f, "Parse error: {s}"),
            ExecError::Other(s) => write!(f, "Execution error: {s}"),
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecError::PostgresError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PostgresError> for ExecError {
    fn from(err: PostgresError) -> Self {
        ExecError::PostgresError(err)
    }
}

/// Capability to run generated SQL against a backend.
///
/// Implementations must not retry or rewrite statements; timeouts are the
/// implementation's concern.
pub trait SqlExecutor {
    /// Execute a DDL/DML statement and return the number of rows affected
    /// (`0` for statements that do not report a count).
    fn execute(&self, sql: &str) -> Result<u64, ExecError>;

    /// Execute a query and return every row.
    fn query(&self, sql: &str) -> Result<Vec<GenericRow>, ExecError>;
}

impl<E: SqlExecutor + ?Sized> SqlExecutor for &E {
    fn execute(&self, sql: &str) -> Result<u64, ExecError> {
        (**self).execute(sql)
    }

    fn query(&self, sql: &str) -> Result<Vec<GenericRow>, ExecError> {
        (**self).query(sql)
    }
}

impl<E: SqlExecutor + ?Sized> SqlExecutor for Box<E> {
    fn execute(&self, sql: &str) -> Result<u64, ExecError> {
        (**self).execute(sql)
    }

    fn query(&self, sql: &str) -> Result<Vec<GenericRow>, ExecError> {
        (**self).query(sql)
    }
}

/// Implementation of [`SqlExecutor`] for `may_postgres::Client`
///
/// Statements are sent without bind parameters: every literal has already been
/// escaped by [`crate::sql::quote`].
pub struct MayPostgresExecutor {
    client: Client,
}

impl MayPostgresExecutor {
    /// Create a new executor from a `may_postgres::Client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Consume the executor and return the underlying client
    pub fn into_client(self) -> Client {
        self.client
    }

    fn observe<T>(&self, started: Instant, result: Result<T, PostgresError>) -> Result<T, ExecError> {
        let _elapsed = started.elapsed();
        #[cfg(feature = "metrics")]
        METRICS.record_statement(_elapsed);

        result.map_err(|e| {
            #[cfg(feature = "metrics")]
            METRICS.record_statement_error();
            ExecError::PostgresError(e)
        })
    }
}

impl SqlExecutor for MayPostgresExecutor {
    fn execute(&self, sql: &str) -> Result<u64, ExecError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_statement_span(sql).entered();

        log::debug!("execute: {sql}");
        let start = Instant::now();
        let result = self.client.execute(sql, &[]);
        self.observe(start, result)
    }

    fn query(&self, sql: &str) -> Result<Vec<GenericRow>, ExecError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_statement_span(sql).entered();

        log::debug!("query: {sql}");
        let start = Instant::now();
        let result = self.client.query(sql, &[]);
        let rows = self.observe(start, result)?;
        rows.iter().map(row_to_generic).collect()
    }
}

/// Decode a driver row into a [`GenericRow`], keeping column order.
pub fn row_to_generic(row: &Row) -> Result<GenericRow, ExecError> {
    let mut out = GenericRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_()).map_err(|e| match e {
            ExecError::PostgresError(e) => {
                ExecError::ParseError(format!("Failed to decode column '{}': {e}", column.name()))
            }
            other => other,
        })?;
        out.push(column.name(), value);
    }
    Ok(out)
}

fn decode_column(row: &Row, idx: usize, ty: &Type) -> Result<SqlValue, ExecError> {
    let value = match ty.name() {
        "bool" => row.try_get::<usize, Option<bool>>(idx)?.into(),
        "int2" => row
            .try_get::<usize, Option<i16>>(idx)?
            .map(i64::from)
            .into(),
        "int4" => row
            .try_get::<usize, Option<i32>>(idx)?
            .map(i64::from)
            .into(),
        "int8" => row.try_get::<usize, Option<i64>>(idx)?.into(),
        "float4" => row
            .try_get::<usize, Option<f32>>(idx)?
            .map(f64::from)
            .into(),
        "float8" => row.try_get::<usize, Option<f64>>(idx)?.into(),
        // NUMERIC aggregates (AVG, SUM over bigint) are surfaced as floats.
        "numeric" => row
            .try_get::<usize, Option<rust_decimal::Decimal>>(idx)?
            .and_then(|d| d.to_f64())
            .into(),
        "timestamp" => row
            .try_get::<usize, Option<chrono::NaiveDateTime>>(idx)?
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            .into(),
        "timestamptz" => row
            .try_get::<usize, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map(|ts| ts.to_rfc3339())
            .into(),
        "date" => row
            .try_get::<usize, Option<chrono::NaiveDate>>(idx)?
            .map(|d| d.to_string())
            .into(),
        "time" => row
            .try_get::<usize, Option<chrono::NaiveTime>>(idx)?
            .map(|t| t.to_string())
            .into(),
        "uuid" => row
            .try_get::<usize, Option<uuid::Uuid>>(idx)?
            .map(|u| u.to_string())
            .into(),
        "json" | "jsonb" => row
            .try_get::<usize, Option<serde_json::Value>>(idx)?
            .map(|v| v.to_string())
            .into(),
        "text" | "varchar" | "bpchar" | "name" => row.try_get::<usize, Option<String>>(idx)?.into(),
        "inet" => row
            .try_get::<usize, Option<IpAddr>>(idx)?
            .map(|ip| ip.to_string())
            .into(),
        "bytea" => row
            .try_get::<usize, Option<Vec<u8>>>(idx)?
            .map(|bytes| bytea_text(&bytes))
            .into(),
        // Arrays of the common element types come back as JSON text.
        "_bool" => array_text(row.try_get::<usize, Option<Vec<Option<bool>>>>(idx)?)?,
        "_int2" => array_text(row.try_get::<usize, Option<Vec<Option<i16>>>>(idx)?)?,
        "_int4" => array_text(row.try_get::<usize, Option<Vec<Option<i32>>>>(idx)?)?,
        "_int8" => array_text(row.try_get::<usize, Option<Vec<Option<i64>>>>(idx)?)?,
        "_float4" => array_text(row.try_get::<usize, Option<Vec<Option<f32>>>>(idx)?)?,
        "_float8" => array_text(row.try_get::<usize, Option<Vec<Option<f64>>>>(idx)?)?,
        "_text" | "_varchar" | "_bpchar" | "_name" => {
            array_text(row.try_get::<usize, Option<Vec<Option<String>>>>(idx)?)?
        }
        "_uuid" => array_text(row.try_get::<usize, Option<Vec<Option<uuid::Uuid>>>>(idx)?)?,
        // Enums and other text-compatible types.
        other => row
            .try_get::<usize, Option<String>>(idx)
            .map_err(|e| unsupported_type(other, idx, &e))?
            .into(),
    };
    Ok(value)
}

/// A decoded array as JSON text, e.g. `[1,null,3]`.
fn array_text<T: Serialize>(items: Option<Vec<Option<T>>>) -> Result<SqlValue, ExecError> {
    match items {
        Some(items) => serde_json::to_string(&items)
            .map(SqlValue::Text)
            .map_err(|e| ExecError::ParseError(format!("Failed to encode array as JSON: {e}"))),
        None => Ok(SqlValue::Null),
    }
}

/// `bytea` in PostgreSQL's hex output format.
fn bytea_text(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn unsupported_type(type_name: &str, idx: usize, cause: &dyn fmt::Display) -> ExecError {
    ExecError::ParseError(format!(
        "unsupported result type '{type_name}' at index {idx}: {cause}"
    ))
}
