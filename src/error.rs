//! Error taxonomy for table definition, query building and staged writes.

use crate::executor::ExecError;
use std::fmt;

/// Errors surfaced by the builder, the metadata resolver and [`TableService`](crate::TableService).
///
/// `InvalidArgument`, `UnsupportedOperation` and `NotFound` are caller mistakes and are
/// always raised before any SQL reaches the backend. `MetadataUnavailable` and
/// `OperationFailed` wrap an [`ExecError`] from the backend.
#[derive(Debug)]
pub enum StagehandError {
    /// Malformed identifiers, empty row sets, inconsistent batches
    InvalidArgument(String),
    /// Unusable table definition or configuration value
    Configuration(String),
    /// Unknown aggregation function or dialect
    UnsupportedOperation(String),
    /// Neither the actual nor the staging table exists
    NotFound { schema: String, table: String },
    /// Catalog probe or introspection failed
    MetadataUnavailable { context: String, source: ExecError },
    /// DDL/DML execution failed
    OperationFailed { context: String, source: ExecError },
}

impl StagehandError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StagehandError::InvalidArgument(msg.into())
    }

    pub(crate) fn not_found(schema: &str, table: &str) -> Self {
        StagehandError::NotFound {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    /// Whether the error was caused by the request rather than the backend.
    ///
    /// Outer adapters map `true` to a client error (HTTP 400/404, CLI usage error).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StagehandError::InvalidArgument(_)
                | StagehandError::UnsupportedOperation(_)
                | StagehandError::NotFound { .. }
        )
    }
}

impl fmt::Display for StagehandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StagehandError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            StagehandError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            StagehandError::UnsupportedOperation(msg) => {
                write!(f, "Unsupported operation: {msg}")
            }
            StagehandError::NotFound { schema, table } => {
                write!(
                    f,
                    "No table or staging table found for {schema}.{table}"
                )
            }
            StagehandError::MetadataUnavailable { context, source } => {
                write!(f, "Metadata unavailable: {context}: {source}")
            }
            StagehandError::OperationFailed { context, source } => {
                write!(f, "Database operation failed: {context}: {source}")
            }
        }
    }
}

impl std::error::Error for StagehandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StagehandError::MetadataUnavailable { source, .. }
            | StagehandError::OperationFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}
