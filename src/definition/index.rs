//! Index definition metadata.

use super::validate_identifier;
use crate::error::StagehandError;
use serde::{Deserialize, Serialize};

/// Index definition metadata
///
/// The index name is never stored: it is derived from the table and column names
/// (`<table>_<col1>_<col2>_idx`) so that re-issuing the same definition is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub column_names: Vec<String>,
    /// Access method, e.g. `BTREE`, `HASH`, `GIN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_type: Option<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new<I, S>(column_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            column_names: column_names.into_iter().map(Into::into).collect(),
            index_type: None,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn using(mut self, index_type: impl Into<String>) -> Self {
        self.index_type = Some(index_type.into());
        self
    }

    /// Deterministic index name for `table`.
    pub fn name_for(&self, table: &str) -> String {
        format!("{}_{}_idx", table, self.column_names.join("_"))
    }

    pub fn validate(&self) -> Result<(), StagehandError> {
        if self.column_names.is_empty() {
            return Err(StagehandError::invalid("index must name at least one column"));
        }
        for column in &self.column_names {
            validate_identifier("index column", column)?;
        }
        if let Some(index_type) = &self.index_type {
            validate_identifier("index type", index_type)?;
        }
        Ok(())
    }
}
