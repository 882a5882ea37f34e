//! Select query descriptions: projection, equality filters and aggregations.

use crate::definition::validate_identifier;
use crate::error::StagehandError;
use crate::value::SqlValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Supported aggregation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Max,
    Min,
    CountDistinct,
}

impl FromStr for AggregateFunction {
    type Err = StagehandError;

    /// Case-insensitive; anything else is `UnsupportedOperation`.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_uppercase().as_str() {
            "COUNT" => Ok(AggregateFunction::Count),
            "SUM" => Ok(AggregateFunction::Sum),
            "AVG" => Ok(AggregateFunction::Avg),
            "MAX" => Ok(AggregateFunction::Max),
            "MIN" => Ok(AggregateFunction::Min),
            "COUNT_DISTINCT" => Ok(AggregateFunction::CountDistinct),
            other => Err(StagehandError::UnsupportedOperation(format!(
                "Unsupported aggregation function: {other}"
            ))),
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Min => "MIN",
            AggregateFunction::CountDistinct => "COUNT_DISTINCT",
        };
        f.write_str(name)
    }
}

/// A requested rollup over one column.
///
/// `function` stays a string until build time so that unknown names surface as
/// `UnsupportedOperation` from the builder rather than as a deserialization error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub function: String,
    /// Column name, or `*` (only with `COUNT`)
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl AggregationSpec {
    pub fn new(function: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            column: column.into(),
            alias: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn parsed_function(&self) -> Result<AggregateFunction, StagehandError> {
        self.function.parse()
    }

    /// Alias, treating blank as absent.
    pub fn alias_name(&self) -> Option<&str> {
        self.alias.as_deref().filter(|a| !a.trim().is_empty())
    }
}

/// Select over one table.
///
/// `columns` are both the projection and, when aggregations are present, the implicit
/// `GROUP BY` keys.
///
/// `filters` are conjunctive equality terms. They are kept sorted by column name, not in
/// the order they were added or appeared in the request JSON, so the `WHERE` clause is
/// emitted in ascending column-name order and the same filter set always renders the
/// same SQL text. The terms are `AND`ed, so the order never changes the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SelectQuerySpec {
    pub schema_name: String,
    pub table_name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, SqlValue>,
    #[serde(default)]
    pub aggregations: Vec<AggregationSpec>,
}

impl SelectQuerySpec {
    pub fn new(schema_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            ..Self::default()
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add (or replace) the equality term for `column`. Terms are rendered by column name.
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.filters.insert(column.into(), value.into());
        self
    }

    pub fn aggregate(mut self, aggregation: AggregationSpec) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    /// Validate identifiers and aggregation shapes before any SQL is built.
    pub fn validate(&self) -> Result<(), StagehandError> {
        validate_identifier("schema", &self.schema_name)?;
        validate_identifier("table", &self.table_name)?;
        for column in &self.columns {
            validate_identifier("column", column)?;
        }
        for column in self.filters.keys() {
            validate_identifier("filter column", column)?;
        }
        for agg in &self.aggregations {
            let function = agg.parsed_function()?;
            if agg.column == "*" {
                if function != AggregateFunction::Count {
                    return Err(StagehandError::invalid(format!(
                        "'*' is only valid with COUNT, not {function}"
                    )));
                }
            } else {
                validate_identifier("aggregation column", &agg.column)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_parsing_is_case_insensitive() {
        assert_eq!("count".parse::<AggregateFunction>().unwrap(), AggregateFunction::Count);
        assert_eq!(
            "Count_Distinct".parse::<AggregateFunction>().unwrap(),
            AggregateFunction::CountDistinct
        );
        assert!(matches!(
            "MEDIAN".parse::<AggregateFunction>(),
            Err(StagehandError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_star_only_with_count() {
        let ok = SelectQuerySpec::new("public", "users").aggregate(AggregationSpec::new("COUNT", "*"));
        assert!(ok.validate().is_ok());

        let bad = SelectQuerySpec::new("public", "users").aggregate(AggregationSpec::new("SUM", "*"));
        assert!(matches!(bad.validate(), Err(StagehandError::InvalidArgument(_))));
    }

    #[test]
    fn test_validate_rejects_bad_filter_keys() {
        let spec = SelectQuerySpec::new("public", "users").filter("name = 'x' OR 1=1 --", "y");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_blank_alias_is_absent() {
        let agg = AggregationSpec::new("MAX", "salary").alias("  ");
        assert_eq!(agg.alias_name(), None);
    }

    #[test]
    fn test_json_request_shape() {
        let spec: SelectQuerySpec = serde_json::from_str(
            r#"{
                "schemaName": "public",
                "tableName": "employees",
                "columns": ["dept"],
                "filters": {"active": true, "region": "EU"},
                "aggregations": [{"function": "count", "column": "*", "alias": "n"}]
            }"#,
        )
        .unwrap();
        assert_eq!(spec.columns, vec!["dept"]);
        assert_eq!(spec.filters.get("active"), Some(&SqlValue::Bool(true)));
        assert_eq!(spec.aggregations[0].alias_name(), Some("n"));
    }

    #[test]
    fn test_filters_are_ordered_by_column_name() {
        let from_json: SelectQuerySpec = serde_json::from_str(
            r#"{"schemaName": "public", "tableName": "t",
                "filters": {"zone": "EU", "active": true, "mode": 1}}"#,
        )
        .unwrap();
        let keys: Vec<&str> = from_json.filters.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["active", "mode", "zone"]);

        let built = SelectQuerySpec::new("public", "t")
            .filter("mode", 1i64)
            .filter("zone", "EU")
            .filter("active", true);
        assert_eq!(built, from_json);
    }
}
