//! PostgreSQL statement builder.

use super::quote::{qualified, quote_identifier, quote_literal, quote_text};
use super::{SqlBuilder, SqlDialect};
use crate::definition::{
    is_type_name, staging_name, validate_identifier, ColumnDefinition, IndexDefinition,
    TableDefinition, IS_DELETED, LAST_UPDATE_DATE,
};
use crate::error::StagehandError;
use crate::query::{AggregateFunction, AggregationSpec, SelectQuerySpec};
use crate::value::{RowValues, SqlValue};

/// Generic type of every staging column and the fallback cast target.
const TEXT_TYPE: &str = "TEXT";

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresSqlBuilder;

impl PostgresSqlBuilder {
    fn actual_column(column: &ColumnDefinition) -> String {
        let mut sql = format!("{} {}", quote_identifier(&column.name), column.column_type.trim());
        if column.not_null {
            sql.push_str(" NOT NULL");
        }
        if column.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if let Some(default) = column.default_expr() {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }

    fn create_table(name: &str, column_defs: &[String]) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
            name,
            column_defs.join(",\n")
        )
    }

    fn check_columns(def: &TableDefinition) -> Result<(), StagehandError> {
        if def.columns.is_empty() {
            return Err(StagehandError::Configuration(format!(
                "Table {}.{} has no columns",
                def.schema_name, def.table_name
            )));
        }
        def.validate()
    }

    fn aggregation(agg: &AggregationSpec) -> Result<String, StagehandError> {
        let function = agg.parsed_function()?;
        let expr = if agg.column == "*" {
            if function != AggregateFunction::Count {
                return Err(StagehandError::invalid(format!(
                    "'*' is only valid with COUNT, not {function}"
                )));
            }
            "COUNT(*)".to_string()
        } else {
            let column = quote_identifier(&agg.column);
            match function {
                AggregateFunction::CountDistinct => format!("COUNT(DISTINCT {column})"),
                other => format!("{other}({column})"),
            }
        };

        Ok(match agg.alias_name() {
            Some(alias) => format!("{expr} AS {}", quote_identifier(alias)),
            None => expr,
        })
    }

    fn filter_term(column: &str, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => format!("{} IS NULL", quote_identifier(column)),
            value => format!("{} = {}", quote_identifier(column), quote_literal(value)),
        }
    }

    /// Cast target for a column promoted out of staging.
    fn cast_type<'a>(def: &'a TableDefinition, column: &str) -> &'a str {
        match column {
            LAST_UPDATE_DATE => "TIMESTAMP",
            IS_DELETED => "BOOLEAN",
            _ => def
                .column(column)
                .map(|c| c.column_type.trim())
                .unwrap_or(TEXT_TYPE),
        }
    }

    /// Shared pieces of both flush shapes: actual table, staging table, insert column
    /// list and cast projection.
    fn flush_parts(
        def: &TableDefinition,
        batch_size: usize,
    ) -> Result<(String, String, String, String), StagehandError> {
        if batch_size == 0 {
            return Err(StagehandError::Configuration(
                "flush batch size must be greater than zero".to_string(),
            ));
        }
        validate_identifier("schema", &def.schema_name)?;
        validate_identifier("table", &def.table_name)?;
        for column in &def.columns {
            validate_identifier("column", &column.name)?;
            if !is_type_name(&column.column_type) {
                return Err(StagehandError::invalid(format!(
                    "column '{}' has an invalid type '{}'",
                    column.name, column.column_type
                )));
            }
        }

        let columns = def.physical_column_names();
        let insert_columns = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let casts = columns
            .iter()
            .map(|c| format!("CAST({} AS {})", quote_identifier(c), Self::cast_type(def, c)))
            .collect::<Vec<_>>()
            .join(", ");

        Ok((
            qualified(&def.schema_name, &def.table_name),
            qualified(&def.schema_name, &def.staging_table_name()),
            insert_columns,
            casts,
        ))
    }
}

impl SqlBuilder for PostgresSqlBuilder {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    fn build_create_table(&self, def: &TableDefinition) -> Result<String, StagehandError> {
        Self::check_columns(def)?;

        let mut column_defs: Vec<String> = def.columns.iter().map(Self::actual_column).collect();
        column_defs.push(format!("{} TIMESTAMP NOT NULL", quote_identifier(LAST_UPDATE_DATE)));
        column_defs.push(format!(
            "{} BOOLEAN NOT NULL DEFAULT FALSE",
            quote_identifier(IS_DELETED)
        ));

        Ok(Self::create_table(
            &qualified(&def.schema_name, &def.table_name),
            &column_defs,
        ))
    }

    fn build_create_staging_table(&self, def: &TableDefinition) -> Result<String, StagehandError> {
        Self::check_columns(def)?;

        let column_defs: Vec<String> = def
            .physical_column_names()
            .into_iter()
            .map(|name| format!("{} {TEXT_TYPE}", quote_identifier(name)))
            .collect();

        Ok(Self::create_table(
            &qualified(&def.schema_name, &def.staging_table_name()),
            &column_defs,
        ))
    }

    fn build_create_index(
        &self,
        schema: &str,
        table: &str,
        index: &IndexDefinition,
    ) -> Result<String, StagehandError> {
        validate_identifier("schema", schema)?;
        validate_identifier("table", table)?;
        index.validate()?;

        let unique = if index.unique { "UNIQUE " } else { "" };
        let using = index
            .index_type
            .as_deref()
            .map(|method| format!(" USING {method}"))
            .unwrap_or_default();
        let columns = index
            .column_names
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!(
            "CREATE {unique}INDEX IF NOT EXISTS {} ON {}{using} ({columns});",
            quote_identifier(&index.name_for(table)),
            qualified(schema, table),
        ))
    }

    fn build_select(&self, spec: &SelectQuerySpec) -> Result<String, StagehandError> {
        spec.validate()?;

        let mut projection: Vec<String> = spec.columns.iter().map(|c| quote_identifier(c)).collect();
        for agg in &spec.aggregations {
            projection.push(Self::aggregation(agg)?);
        }
        let select_clause = if projection.is_empty() {
            "*".to_string()
        } else {
            projection.join(", ")
        };

        let mut sql = format!(
            "SELECT {select_clause} FROM {}",
            qualified(&spec.schema_name, &spec.table_name)
        );

        if !spec.filters.is_empty() {
            let terms = spec
                .filters
                .iter()
                .map(|(column, value)| Self::filter_term(column, value))
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(" WHERE ");
            sql.push_str(&terms);
        }

        if !spec.aggregations.is_empty() && !spec.columns.is_empty() {
            let keys = spec
                .columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" GROUP BY ");
            sql.push_str(&keys);
        }

        Ok(sql)
    }

    fn build_bulk_insert(
        &self,
        schema: &str,
        table: &str,
        rows: &[RowValues],
        is_staging: bool,
    ) -> Result<String, StagehandError> {
        let first = rows
            .first()
            .ok_or_else(|| StagehandError::invalid("Insert rows cannot be empty"))?;
        if first.is_empty() {
            return Err(StagehandError::invalid("Insert rows must carry at least one column"));
        }

        validate_identifier("schema", schema)?;
        validate_identifier("table", table)?;
        for column in first.keys() {
            validate_identifier("column", column)?;
        }
        if let Some(position) = rows.iter().position(|row| !row.keys().eq(first.keys())) {
            return Err(StagehandError::invalid(format!(
                "row {position} does not have the same columns as the first row"
            )));
        }

        let target = if is_staging {
            staging_name(table)
        } else {
            table.to_string()
        };
        let columns = first
            .keys()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let values = rows
            .iter()
            .map(|row| {
                let tuple = row.values().map(|v| quote_text(v)).collect::<Vec<_>>();
                format!("({})", tuple.join(", "))
            })
            .collect::<Vec<_>>()
            .join(",\n");

        Ok(format!(
            "INSERT INTO {} ({columns}) VALUES\n{values};",
            qualified(schema, &target)
        ))
    }

    fn build_flush(&self, def: &TableDefinition, batch_size: usize) -> Result<String, StagehandError> {
        let (actual, staging, columns, casts) = Self::flush_parts(def, batch_size)?;
        Ok(format!(
            "INSERT INTO {actual} ({columns})\nSELECT {casts} FROM {staging} WHERE {} = 'false' LIMIT {batch_size};",
            quote_identifier(IS_DELETED)
        ))
    }

    fn build_flush_move(
        &self,
        def: &TableDefinition,
        batch_size: usize,
    ) -> Result<String, StagehandError> {
        let (actual, staging, columns, casts) = Self::flush_parts(def, batch_size)?;
        // ctid identifies the physical staging row; SKIP LOCKED keeps concurrent moves disjoint.
        Ok(format!(
            "WITH \"moved\" AS (\n\
             DELETE FROM {staging} WHERE ctid IN (\
             SELECT ctid FROM {staging} WHERE {} = 'false' LIMIT {batch_size} FOR UPDATE SKIP LOCKED)\n\
             RETURNING *\n\
             )\n\
             INSERT INTO {actual} ({columns})\n\
             SELECT {casts} FROM \"moved\";",
            quote_identifier(IS_DELETED)
        ))
    }

    fn build_table_exists(&self, schema: &str, table: &str) -> Result<String, StagehandError> {
        validate_identifier("schema", schema)?;
        validate_identifier("table", table)?;
        Ok(format!(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = {} AND table_name = {});",
            quote_text(schema),
            quote_text(table)
        ))
    }
}
