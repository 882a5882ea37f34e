//! Row files for `stagehand insert`.
//!
//! JSON files hold an array of objects. CSV files take their column names from the
//! header row. Every value becomes text, which is what the staging table stores anyway.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use stagehand::RowValues;
use std::io::Read;
use std::path::Path;

pub fn load(path: &Path) -> Result<Vec<RowValues>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open row file {}", path.display()))?;
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let rows = if is_csv { from_csv(file) } else { from_json(file) };
    rows.with_context(|| format!("Failed to read rows from {}", path.display()))
}

pub fn from_json<R: Read>(reader: R) -> Result<Vec<RowValues>> {
    let objects: Vec<serde_json::Map<String, Value>> =
        serde_json::from_reader(reader).context("expected a JSON array of objects")?;

    objects
        .into_iter()
        .enumerate()
        .map(|(i, object)| {
            object
                .into_iter()
                .map(|(column, value)| {
                    let text = match value {
                        Value::String(s) => s,
                        Value::Null => bail!("row {i}: column '{column}' is null"),
                        // Numbers and booleans keep their JSON spelling; nested values
                        // are stored as JSON text.
                        other => other.to_string(),
                    };
                    Ok((column, text))
                })
                .collect::<Result<RowValues>>()
        })
        .collect()
}

pub fn from_csv<R: Read>(reader: R) -> Result<Vec<RowValues>> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers().context("missing CSV header row")?.clone();

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("malformed CSV record {}", i + 1))?;
        let row: RowValues = headers
            .iter()
            .zip(record.iter())
            .map(|(column, value)| (column.to_string(), value.to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}
