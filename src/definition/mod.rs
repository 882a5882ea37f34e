//! Canonical in-memory table shapes.
//!
//! A [`TableDefinition`] is built either from a client request (create path) or by the
//! metadata resolver from catalog introspection (read path). It is never mutated after
//! construction; the builder-style methods consume and return a new value.

pub mod column;
pub mod index;
pub mod table;

pub use column::{is_type_name, ColumnDefinition};
pub use index::IndexDefinition;
pub use table::{staging_name, TableDefinition, IS_DELETED, LAST_UPDATE_DATE, RESERVED_COLUMNS, STAGING_PREFIX};

use crate::error::StagehandError;
use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Whether `name` is a plain SQL identifier (`^[A-Za-z_]\w*$`).
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Reject anything that is not a plain identifier. `what` names the offending field.
pub fn validate_identifier(what: &str, name: &str) -> Result<(), StagehandError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(StagehandError::invalid(format!(
            "{what} '{name}' must match ^[A-Za-z_]\\w*$"
        )))
    }
}
