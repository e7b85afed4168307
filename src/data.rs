//! Data sets for data-driven groups and steps.

use crate::model::{DataSource, DataSourceKind};
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads [`DataSource`]s into lists of records. Relative paths resolve
/// against `base_dir`.
#[derive(Debug, Clone)]
pub struct DataLoader {
    base_dir: PathBuf,
}

impl DataLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Load `source` as an array of objects.
    pub fn load(&self, source: &DataSource) -> Result<Value> {
        let records = match source.kind {
            DataSourceKind::Csv => self.load_csv(self.required_path(source)?)?,
            DataSourceKind::Json => self.load_json(self.required_path(source)?)?,
            DataSourceKind::Inline => {
                let data = source
                    .data
                    .as_ref()
                    .ok_or_else(|| anyhow!("inline data source has no data"))?;
                into_records(data.clone(), "inline data")?
            }
        };
        debug!(kind = ?source.kind, records = records.len(), "loaded data source");
        Ok(Value::Array(records))
    }

    fn required_path<'a>(&self, source: &'a DataSource) -> Result<&'a str> {
        source
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("{:?} data source requires a path", source.kind))
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn load_csv(&self, path: &str) -> Result<Vec<Value>> {
        let full = self.resolve(path);
        let mut reader = csv::Reader::from_path(&full)
            .context(format!("Failed to open CSV file {}", full.display()))?;
        let headers = reader
            .headers()
            .context("Failed to read CSV headers")?
            .clone();

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.context("Failed to read CSV row")?;
            if row.len() != headers.len() {
                bail!(
                    "CSV row has {} columns, expected {}",
                    row.len(),
                    headers.len()
                );
            }
            let record: Map<String, Value> = headers
                .iter()
                .zip(row.iter())
                .map(|(name, cell)| (name.to_string(), parse_cell(cell)))
                .collect();
            records.push(Value::Object(record));
        }
        Ok(records)
    }

    fn load_json(&self, path: &str) -> Result<Vec<Value>> {
        let full = self.resolve(path);
        let content = fs::read_to_string(&full)
            .context(format!("Failed to open JSON file {}", full.display()))?;
        let data: Value = serde_json::from_str(&content)
            .context(format!("Failed to parse JSON file {}", full.display()))?;
        into_records(data, "JSON file")
    }
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Accept an array of objects, or a single object wrapped into one.
fn into_records(data: Value, what: &str) -> Result<Vec<Value>> {
    match data {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if !item.is_object() {
                    bail!("{what} item {i} is not an object");
                }
            }
            Ok(items)
        }
        object @ Value::Object(_) => Ok(vec![object]),
        _ => bail!("{what} must be an object or array of objects"),
    }
}

/// Type a CSV cell: integer, then float, then boolean, else string.
fn parse_cell(cell: &str) -> Value {
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    match cell {
        "true" | "TRUE" | "True" | "t" | "T" => Value::Bool(true),
        "false" | "FALSE" | "False" | "f" | "F" => Value::Bool(false),
        _ => Value::String(cell.to_string()),
    }
}
