//! Test support: a scripted [`SqlExecutor`] that records every statement.
//!
//! Available to unit tests and, through the `test-helpers` feature, to integration
//! tests and downstream crates.

use crate::executor::{ExecError, SqlExecutor};
use crate::value::{GenericRow, SqlValue};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Script {
    statements: Vec<String>,
    executed: Vec<String>,
    responses: Vec<(Vec<String>, Vec<GenericRow>)>,
    affected: Vec<(String, VecDeque<u64>)>,
    failing_queries: Vec<String>,
    failing_executions: Vec<String>,
    fail_after: Option<usize>,
}

fn matches_all(sql: &str, patterns: &[String]) -> bool {
    patterns.iter().all(|p| sql.contains(p.as_str()))
}

/// Records statements and answers them from a script.
///
/// - `query` returns the rows of the most recently registered response whose patterns
///   all occur in the statement, or no rows.
/// - `execute` returns the next queued affected-row count for the first matching
///   pattern, or 0.
/// - Either fails when the statement matches a failure pattern.
#[derive(Default)]
pub struct RecordingExecutor {
    script: Mutex<Script>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answer queries containing `pattern` with `rows`.
    pub fn respond_to(&self, pattern: impl Into<String>, rows: Vec<GenericRow>) {
        self.respond_when(&[pattern.into()], rows);
    }

    /// Answer queries containing every one of `patterns` with `rows`.
    pub fn respond_when<S: AsRef<str>>(&self, patterns: &[S], rows: Vec<GenericRow>) {
        let patterns = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        self.script().responses.push((patterns, rows));
    }

    /// Queue affected-row counts for executions containing `pattern`.
    pub fn affect_rows(&self, pattern: impl Into<String>, counts: impl IntoIterator<Item = u64>) {
        self.script()
            .affected
            .push((pattern.into(), counts.into_iter().collect()));
    }

    pub fn fail_queries_matching(&self, pattern: impl Into<String>) {
        self.script().failing_queries.push(pattern.into());
    }

    pub fn fail_executions_matching(&self, pattern: impl Into<String>) {
        self.script().failing_executions.push(pattern.into());
    }

    /// Let `successes` executions through, fail every later one.
    pub fn fail_after_executions(&self, successes: usize) {
        self.script().fail_after = Some(successes);
    }

    /// Script the existence probes for `table` and its staging table.
    pub fn set_table_presence(&self, schema: &str, table: &str, actual: bool, staging: bool) {
        self.respond_to(
            Self::probe_pattern(schema, table),
            vec![Self::exists_row(actual)],
        );
        self.respond_to(
            Self::probe_pattern(schema, &crate::definition::staging_name(table)),
            vec![Self::exists_row(staging)],
        );
    }

    /// Script the catalog column listing of `schema.table`.
    pub fn describe_table(&self, schema: &str, table: &str, columns: Vec<GenericRow>) {
        self.respond_when(
            &[
                "\"information_schema\".\"columns\"".to_string(),
                format!("\"table_schema\" = '{schema}'"),
                format!("\"table_name\" = '{table}'"),
            ],
            columns,
        );
    }

    fn probe_pattern(schema: &str, table: &str) -> String {
        format!("table_schema = '{schema}' AND table_name = '{table}')")
    }

    pub fn exists_row(exists: bool) -> GenericRow {
        GenericRow::new().with("exists", exists)
    }

    /// A row shaped like the catalog column listing, for a built-in type.
    pub fn column_row(name: &str, udt_name: &str, nullable: bool) -> GenericRow {
        Self::typed_column_row(name, "pg_catalog", udt_name, nullable)
    }

    /// A catalog column row whose type lives in `udt_schema`.
    pub fn typed_column_row(
        name: &str,
        udt_schema: &str,
        udt_name: &str,
        nullable: bool,
    ) -> GenericRow {
        let data_type = if udt_name.starts_with('_') {
            "ARRAY"
        } else if udt_schema == "pg_catalog" {
            udt_name
        } else {
            "USER-DEFINED"
        };
        GenericRow::new()
            .with("column_name", name)
            .with("udt_schema", udt_schema)
            .with("udt_name", udt_name)
            .with("data_type", data_type)
            .with("is_nullable", if nullable { "YES" } else { "NO" })
            .with("column_default", SqlValue::Null)
    }

    /// Every statement seen, queries and executions, in order.
    pub fn statements(&self) -> Vec<String> {
        self.script().statements.clone()
    }

    /// Statements sent through `execute` only.
    pub fn executed(&self) -> Vec<String> {
        self.script().executed.clone()
    }

    pub fn clear(&self) {
        let mut script = self.script();
        script.statements.clear();
        script.executed.clear();
    }
}

impl SqlExecutor for RecordingExecutor {
    fn execute(&self, sql: &str) -> Result<u64, ExecError> {
        let mut script = self.script();
        script.statements.push(sql.to_string());
        script.executed.push(sql.to_string());

        let over_limit = script
            .fail_after
            .is_some_and(|limit| script.executed.len() > limit);
        if over_limit || script.failing_executions.iter().any(|p| sql.contains(p.as_str())) {
            return Err(ExecError::QueryError(format!("scripted failure: {sql}")));
        }

        Ok(script
            .affected
            .iter_mut()
            .find(|(pattern, counts)| sql.contains(pattern.as_str()) && !counts.is_empty())
            .and_then(|(_, counts)| counts.pop_front())
            .unwrap_or(0))
    }

    fn query(&self, sql: &str) -> Result<Vec<GenericRow>, ExecError> {
        let mut script = self.script();
        script.statements.push(sql.to_string());

        if script.failing_queries.iter().any(|p| sql.contains(p.as_str())) {
            return Err(ExecError::QueryError(format!("scripted failure: {sql}")));
        }

        Ok(script
            .responses
            .iter()
            .rev()
            .find(|(patterns, _)| matches_all(sql, patterns))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }
}
