//! Best-effort parsing of catalog index definitions.
//!
//! Handles the text PostgreSQL reports in `pg_indexes.indexdef`:
//!
//! ```text
//! CREATE [UNIQUE] INDEX name ON [ONLY] schema.table USING method (col [opclass] [DESC] [NULLS LAST], ...)
//!     [INCLUDE (...)] [WHERE ...]
//! ```
//!
//! Expression entries have no [`IndexDefinition`] counterpart and fail the parse.

use crate::definition::{is_identifier, IndexDefinition};
use std::fmt;

/// An index definition that could not be mapped onto an [`IndexDefinition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexParseError {
    pub definition: String,
    pub reason: String,
}

impl IndexParseError {
    fn new(definition: &str, reason: impl Into<String>) -> Self {
        Self {
            definition: definition.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for IndexParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot parse index definition ({}): {}", self.reason, self.definition)
    }
}

impl std::error::Error for IndexParseError {}

/// Parse one `indexdef` string.
pub fn parse_index_definition(definition: &str) -> Result<IndexDefinition, IndexParseError> {
    let text = definition.trim();
    let upper = text.to_ascii_uppercase();

    if !upper.starts_with("CREATE ") {
        return Err(IndexParseError::new(definition, "not a CREATE statement"));
    }
    let head_end = upper
        .find(" ON ")
        .ok_or_else(|| IndexParseError::new(definition, "missing ON clause"))?;
    let head: Vec<&str> = upper[..head_end].split_whitespace().collect();
    if !head.contains(&"INDEX") {
        return Err(IndexParseError::new(definition, "not a CREATE INDEX statement"));
    }
    let unique = head.get(1) == Some(&"UNIQUE");

    let after_on = &text[head_end + " ON ".len()..];
    let open = find_unquoted(after_on, '(')
        .ok_or_else(|| IndexParseError::new(definition, "missing column list"))?;
    let target = &after_on[..open];
    let close = matching_paren(after_on, open)
        .ok_or_else(|| IndexParseError::new(definition, "unbalanced parentheses"))?;

    let mut tokens = target.split_whitespace();
    let mut index_type = None;
    while let Some(token) = tokens.next() {
        if token.eq_ignore_ascii_case("USING") {
            index_type = tokens.next().map(str::to_ascii_uppercase);
        }
    }

    let mut column_names = Vec::new();
    for entry in split_top_level(&after_on[open + 1..close]) {
        column_names.push(entry_column(entry).ok_or_else(|| {
            IndexParseError::new(definition, format!("unsupported index entry '{}'", entry.trim()))
        })?);
    }
    if column_names.is_empty() {
        return Err(IndexParseError::new(definition, "empty column list"));
    }

    Ok(IndexDefinition {
        column_names,
        index_type,
        unique,
    })
}

/// Byte offset of the first `needle` outside double quotes.
fn find_unquoted(text: &str, needle: char) -> Option<usize> {
    let mut quoted = false;
    for (i, ch) in text.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            c if c == needle && !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

/// Byte offset of the `)` closing the `(` at `open`.
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quoted = false;
    for (i, ch) in text[open..].char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas that are outside parentheses and quotes.
fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (i, ch) in list.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                parts.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

/// Column name of one index entry, dropping opclass and ordering suffixes.
fn entry_column(entry: &str) -> Option<String> {
    let entry = entry.trim();
    if let Some(rest) = entry.strip_prefix('"') {
        let mut name = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    name.push('"');
                } else {
                    return Some(name);
                }
            } else {
                name.push(ch);
            }
        }
        return None;
    }

    let first = entry.split_whitespace().next()?;
    is_identifier(first).then(|| first.to_string())
}
