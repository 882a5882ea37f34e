//! Table definition metadata.

use super::{validate_identifier, ColumnDefinition, IndexDefinition};
use crate::error::StagehandError;
use serde::{Deserialize, Serialize};

/// Versioning column appended to every actual and staging table.
pub const LAST_UPDATE_DATE: &str = "lastUpdateDate";
/// Tombstone column appended to every actual and staging table.
pub const IS_DELETED: &str = "isDeleted";
/// Reserved trailing columns, in declaration order.
pub const RESERVED_COLUMNS: [&str; 2] = [LAST_UPDATE_DATE, IS_DELETED];
/// Name prefix linking a staging table to its actual table.
pub const STAGING_PREFIX: &str = "__tmp_write_";

/// Table definition metadata
///
/// `columns` holds the user-declared columns; the reserved `lastUpdateDate` and
/// `isDeleted` columns are implied and appended by the SQL builder. Definitions
/// reconstructed from the catalog also list the reserved columns, since they are
/// physically present there.
///
/// `is_staging` means "has (or should have) a staging table": on the create path it
/// asks for the staging table to be created alongside the actual one, on the read path
/// it reports that only the staging table was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    #[serde(default, alias = "temporaryWriteTable")]
    pub is_staging: bool,
}

impl TableDefinition {
    pub fn new(
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        columns: Vec<ColumnDefinition>,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            columns,
            indexes: Vec::new(),
            is_staging: false,
        }
    }

    pub fn with_indexes(mut self, indexes: Vec<IndexDefinition>) -> Self {
        self.indexes = indexes;
        self
    }

    pub fn staging(mut self, is_staging: bool) -> Self {
        self.is_staging = is_staging;
        self
    }

    /// `__tmp_write_<table>`
    pub fn staging_table_name(&self) -> String {
        staging_name(&self.table_name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Declared columns followed by the reserved columns, each name exactly once.
    pub fn physical_column_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| !RESERVED_COLUMNS.contains(name))
            .collect();
        names.extend(RESERVED_COLUMNS);
        names
    }

    /// Validate a client-supplied definition before any DDL is built.
    pub fn validate(&self) -> Result<(), StagehandError> {
        validate_identifier("schema", &self.schema_name)?;
        validate_identifier("table", &self.table_name)?;

        if self.columns.is_empty() {
            return Err(StagehandError::invalid(format!(
                "table {}.{} must declare at least one column",
                self.schema_name, self.table_name
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            column.validate()?;
            if !seen.insert(column.name.as_str()) {
                return Err(StagehandError::invalid(format!(
                    "column '{}' is declared twice",
                    column.name
                )));
            }
        }

        for index in &self.indexes {
            index.validate()?;
        }
        Ok(())
    }
}

/// Staging table name for an actual table name.
pub fn staging_name(table: &str) -> String {
    format!("{STAGING_PREFIX}{table}")
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_physical_columns_append_reserved_once() {
        assert_eq!(
            users().physical_column_names(),
            vec!["id", "name", "lastUpdateDate", "isDeleted"]
        );

        // Catalog-resolved definitions already carry the reserved columns.
        let mut resolved = users();
        resolved.columns.push(ColumnDefinition::new(LAST_UPDATE_DATE, "timestamp"));
        resolved.columns.push(ColumnDefinition::new(IS_DELETED, "bool"));
        assert_eq!(
            resolved.physical_column_names(),
            vec!["id", "name", "lastUpdateDate", "isDeleted"]
        );
    }

    #[test]
    fn test_staging_table_name() {
        assert_eq!(users().staging_table_name(), "__tmp_write_users");
    }

    #[test]
    fn test_validate_rejects_empty_and_duplicate_columns() {
        let empty = TableDefinition::new("public", "t", vec![]);
        assert!(matches!(empty.validate(), Err(StagehandError::InvalidArgument(_))));

        let dup = TableDefinition::new(
            "public",
            "t",
            vec![ColumnDefinition::new("a", "INT"), ColumnDefinition::new("a", "TEXT")],
        );
        assert!(dup.validate().is_err());
    }

    #[test]
    fn test_validate_checks_names_and_indexes() {
        assert!(users().validate().is_ok());

        let mut bad_schema = users();
        bad_schema.schema_name = "public; drop".into();
        assert!(bad_schema.validate().is_err());

        let bad_index = users().with_indexes(vec![IndexDefinition::new(["na me"])]);
        assert!(bad_index.validate().is_err());
    }

    #[test]
    fn test_accepts_original_staging_flag_name() {
        let def: TableDefinition = serde_json::from_str(
            r#"{
                "schemaName": "public",
                "tableName": "users",
                "columns": [{"name": "id", "type": "INT"}],
                "temporaryWriteTable": true
            }"#,
        )
        .unwrap();
        assert!(def.is_staging);
        assert!(def.indexes.is_empty());
    }
}
