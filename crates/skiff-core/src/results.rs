//! Tabular query results written to well-known paths in a sandbox.
//!
//! Analysis tooling inside the container reads the last query result from
//! `/tmp/mongodb_result.json` (pretty-printed row array) and
//! `/tmp/mongodb_result.csv`. Writing the files is best-effort: a failed
//! write is logged, never raised, so a flaky container cannot fail the
//! query that produced the result.

use crate::driver::ContainerDriver;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skiff_docker::{ContainerEngine, ContainerRef};

/// JSON result path inside the container.
pub const RESULT_JSON_PATH: &str = "/tmp/mongodb_result.json";
/// CSV result path inside the container.
pub const RESULT_CSV_PATH: &str = "/tmp/mongodb_result.csv";

/// One result column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A tabular query result: row objects plus the column order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<Value>,
    pub columns: Vec<Column>,
}

/// Write a result to both well-known paths. Empty results are a no-op.
pub async fn write_result_to_container<E: ContainerEngine>(
    driver: &ContainerDriver<E>,
    container: &ContainerRef,
    result: &QueryResult,
) {
    if result.rows.is_empty() {
        tracing::debug!(container = %container.name, "Empty result set, skipping result files");
        return;
    }

    match serde_json::to_string_pretty(&result.rows) {
        Ok(json) => {
            if let Err(e) = driver
                .write_file(container, RESULT_JSON_PATH, json.as_bytes())
                .await
            {
                tracing::warn!(container = %container.name, error = %e, "Failed to write JSON result");
            }
        }
        Err(e) => {
            tracing::warn!(container = %container.name, error = %e, "Failed to serialize result rows");
        }
    }

    let csv = render_csv(result);
    if let Err(e) = driver
        .write_file(container, RESULT_CSV_PATH, csv.as_bytes())
        .await
    {
        tracing::warn!(container = %container.name, error = %e, "Failed to write CSV result");
    }
}

/// Render the result as CSV: a header row of column names, then one line
/// per record.
pub fn render_csv(result: &QueryResult) -> String {
    let mut out = String::new();
    let header: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in &result.rows {
        let fields: Vec<String> = result
            .columns
            .iter()
            .map(|c| csv_field(row.get(&c.name)))
            .collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

/// Format one cell. Missing and null become empty; nested structures are
/// embedded as quoted JSON; scalars are quoted only when they contain a
/// comma, quote, or newline, with inner quotes doubled.
fn csv_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(v @ (Value::Object(_) | Value::Array(_))) => {
            format!("\"{}\"", v.to_string().replace('"', "\"\""))
        }
        Some(Value::String(s)) => quote_if_needed(s),
        Some(other) => quote_if_needed(&other.to_string()),
    }
}

fn quote_if_needed(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
