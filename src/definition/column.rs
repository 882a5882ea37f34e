//! Column definition metadata.

use super::table::RESERVED_COLUMNS;
use super::validate_identifier;
use crate::error::StagehandError;
use serde::{Deserialize, Serialize};

/// Whether `ty` can be emitted verbatim into DDL or a cast without changing the
/// statement around it.
///
/// Any backend type spelling passes, including `app.mood`, `"Mood"`,
/// `geometry(Point, 4326)`, `varchar(20) COLLATE "C"` and `int4[]`. Rejected: statement
/// separators, comments, string literals, and unbalanced parentheses, brackets or
/// double quotes.
pub fn is_type_name(ty: &str) -> bool {
    let ty = ty.trim();
    let starts_like_a_name = ty
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '"');
    if !starts_like_a_name
        || ty.contains(';')
        || ty.contains("--")
        || ty.contains("/*")
        || ty.contains('\'')
    {
        return false;
    }

    let mut parens = 0usize;
    let mut brackets = 0usize;
    let mut quoted = false;
    for c in ty.chars() {
        match c {
            '"' => quoted = !quoted,
            _ if quoted => {}
            '(' => parens += 1,
            '[' => brackets += 1,
            ')' => match parens.checked_sub(1) {
                Some(depth) => parens = depth,
                None => return false,
            },
            ']' => match brackets.checked_sub(1) {
                Some(depth) => brackets = depth,
                None => return false,
            },
            _ => {}
        }
    }
    !quoted && parens == 0 && brackets == 0
}

/// Column definition metadata
///
/// `column_type` is the backend-native type name, emitted verbatim into DDL and flush
/// casts. `default_value` is a raw SQL literal or expression (e.g. `0`, `'n/a'`, `now()`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            primary_key: false,
            not_null: false,
            default_value: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default_value = Some(expr.into());
        self
    }

    /// The default expression, treating an empty string as absent.
    pub fn default_expr(&self) -> Option<&str> {
        self.default_value.as_deref().filter(|d| !d.is_empty())
    }

    /// Validate a client-supplied column before it is turned into DDL.
    pub fn validate(&self) -> Result<(), StagehandError> {
        validate_identifier("column name", &self.name)?;

        if RESERVED_COLUMNS.contains(&self.name.as_str()) {
            return Err(StagehandError::invalid(format!(
                "column name '{}' is reserved",
                self.name
            )));
        }

        if !is_type_name(&self.column_type) {
            return Err(StagehandError::invalid(format!(
                "column '{}' has an invalid type '{}'",
                self.name, self.column_type
            )));
        }

        if let Some(default) = self.default_expr() {
            if default.contains(';') || default.contains("--") {
                return Err(StagehandError::invalid(format!(
                    "default value for column '{}' may not contain ';' or '--'",
                    self.name
                )));
            }
        }

        Ok(())
    }
}
