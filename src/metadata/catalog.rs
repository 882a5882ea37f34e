//! Catalog introspection queries and row decoding.
//!
//! Queries are built with sea-query and rendered with their literals inlined, since
//! [`SqlExecutor`](crate::executor::SqlExecutor) takes plain statement text. Every
//! selected catalog column is cast to `text` so domain types such as `sql_identifier`
//! decode as strings.

use crate::definition::ColumnDefinition;
use crate::executor::ExecError;
use crate::sql::quote::quote_identifier;
use crate::value::GenericRow;
use sea_query::{
    Expr, ExprTrait, IntoIden, Order, PostgresQueryBuilder, Query, SchemaName, SelectStatement,
    TableName, TableRef,
};
use std::collections::HashSet;

/// Schemas never treated as user tables.
pub const SYSTEM_SCHEMAS: [&str; 2] = ["information_schema", "pg_catalog"];

fn catalog_table(schema: &'static str, table: &'static str) -> TableRef {
    TableRef::Table(TableName(Some(SchemaName::from(schema)), table.into_iden()), None)
}

fn select_text(query: &mut SelectStatement, columns: &[&'static str]) {
    for column in columns {
        query.expr_as(Expr::col(*column).cast_as("text"), *column);
    }
}

/// Columns of one table in ordinal order.
pub fn columns_query(schema: &str, table: &str) -> String {
    let mut query = Query::select();
    select_text(
        &mut query,
        &[
            "column_name",
            "udt_schema",
            "udt_name",
            "data_type",
            "is_nullable",
            "column_default",
        ],
    );
    query
        .from(catalog_table("information_schema", "columns"))
        .and_where(Expr::col("table_schema").eq(schema))
        .and_where(Expr::col("table_name").eq(table))
        .order_by("ordinal_position", Order::Asc);
    query.to_string(PostgresQueryBuilder)
}

/// Primary-key member columns of one table.
pub fn primary_key_query(schema: &str, table: &str) -> String {
    let mut constraints = Query::select();
    constraints
        .column("constraint_name")
        .from(catalog_table("information_schema", "table_constraints"))
        .and_where(Expr::col("table_schema").eq(schema))
        .and_where(Expr::col("table_name").eq(table))
        .and_where(Expr::col("constraint_type").eq("PRIMARY KEY"));

    let mut query = Query::select();
    select_text(&mut query, &["column_name"]);
    query
        .from(catalog_table("information_schema", "key_column_usage"))
        .and_where(Expr::col("table_schema").eq(schema))
        .and_where(Expr::col("table_name").eq(table))
        .and_where(Expr::col("constraint_name").in_subquery(constraints))
        .order_by("ordinal_position", Order::Asc);
    query.to_string(PostgresQueryBuilder)
}

/// Textual index definitions of one table.
pub fn indexes_query(schema: &str, table: &str) -> String {
    let mut query = Query::select();
    select_text(&mut query, &["indexname", "indexdef"]);
    query
        .from(catalog_table("pg_catalog", "pg_indexes"))
        .and_where(Expr::col("schemaname").eq(schema))
        .and_where(Expr::col("tablename").eq(table))
        .order_by("indexname", Order::Asc);
    query.to_string(PostgresQueryBuilder)
}

/// Every user column in the database, grouped by table in ordinal order.
pub fn all_columns_query() -> String {
    let mut query = Query::select();
    select_text(&mut query, &["table_schema", "table_name", "column_name"]);
    query
        .from(catalog_table("information_schema", "columns"))
        .and_where(Expr::col("table_schema").is_not_in(SYSTEM_SCHEMAS))
        .order_by("table_schema", Order::Asc)
        .order_by("table_name", Order::Asc)
        .order_by("ordinal_position", Order::Asc);
    query.to_string(PostgresQueryBuilder)
}

/// Required text field of a catalog row.
pub(crate) fn text_field(row: &GenericRow, column: &str) -> Result<String, ExecError> {
    row.get_str(column)
        .map(str::to_string)
        .ok_or_else(|| ExecError::ParseError(format!("catalog row is missing '{column}'")))
}

/// Catalog type name as it must be spelled in DDL and casts: `_int4` arrays become `int4[]`.
pub fn normalize_type_name(udt_name: &str, data_type: Option<&str>) -> String {
    match (data_type, udt_name.strip_prefix('_')) {
        (Some(dt), Some(element)) if dt.eq_ignore_ascii_case("ARRAY") => format!("{element}[]"),
        _ => udt_name.to_string(),
    }
}

/// Type name for a column whose type lives in `udt_schema`.
///
/// Built-in `pg_catalog` types keep their bare name. Anything else (enums, domains,
/// extension types) is schema-qualified and quoted, so it resolves regardless of
/// `search_path` and keeps its case.
pub fn catalog_type_name(udt_schema: Option<&str>, udt_name: &str, data_type: Option<&str>) -> String {
    match udt_schema {
        None | Some("pg_catalog") => normalize_type_name(udt_name, data_type),
        Some(schema) => {
            let element = udt_name
                .strip_prefix('_')
                .filter(|_| data_type.is_some_and(|dt| dt.eq_ignore_ascii_case("ARRAY")));
            match element {
                Some(element) => format!(
                    "{}.{}[]",
                    quote_identifier(schema),
                    quote_identifier(element)
                ),
                None => format!("{}.{}", quote_identifier(schema), quote_identifier(udt_name)),
            }
        }
    }
}

/// Decode the rows of [`columns_query`], marking members of `primary_keys`.
pub fn columns_from_rows(
    rows: &[GenericRow],
    primary_keys: &HashSet<String>,
) -> Result<Vec<ColumnDefinition>, ExecError> {
    rows.iter()
        .map(|row| {
            let name = text_field(row, "column_name")?;
            let udt_name = text_field(row, "udt_name")?;
            let column_type =
                catalog_type_name(row.get_str("udt_schema"), &udt_name, row.get_str("data_type"));
            Ok(ColumnDefinition {
                primary_key: primary_keys.contains(&name),
                not_null: row.get_str("is_nullable") == Some("NO"),
                default_value: row.get_str("column_default").map(str::to_string),
                name,
                column_type,
            })
        })
        .collect()
}
