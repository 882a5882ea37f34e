//! Identifier and literal quoting.
//!
//! Every piece of caller-controlled text that ends up in generated SQL passes through
//! one of these functions. Identifiers are additionally validated upstream
//! (`^[A-Za-z_][A-Za-z0-9_]*$`), but quoting alone keeps them from breaking out of the statement.

use crate::value::SqlValue;

/// Wrap `name` in double quotes, doubling embedded double quotes.
///
/// ```
/// use stagehand::sql::quote::quote_identifier;
/// assert_eq!(quote_identifier("users"), r#""users""#);
/// assert_eq!(quote_identifier(r#"we"ird"#), r#""we""ird""#);
/// ```
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Wrap `value` in single quotes, doubling embedded single quotes.
pub fn quote_text(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render a scalar as a SQL literal.
///
/// Numbers and booleans are emitted bare; everything else is quoted text. Non-finite
/// floats have no bare SQL spelling and are quoted (`'NaN'`, `'inf'`).
pub fn quote_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => b.to_string(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) if f.is_finite() => f.to_string(),
        SqlValue::Float(f) => quote_text(&f.to_string()),
        SqlValue::Text(s) => quote_text(s),
    }
}

/// `"schema"."table"`
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}
