//! Raw table definition and parsers
//!
//! A `RawTable` is an untyped header + rows grid of strings. It is produced
//! from CSV text (the published sheet export) or from a JSON array of records,
//! and consumed by the normalizer.

use crate::error::ComputeError;
use serde_json::Value;

pub const COL_TIMESTAMP: &str = "Timestamp";
pub const COL_BPM: &str = "BPM";
pub const COL_RAW_VALUE: &str = "Raw Value";
pub const COL_GSR_VOLTAGE: &str = "GSR Voltage";
pub const COL_TEMPERATURE: &str = "Temperature";
pub const COL_LATITUDE: &str = "Latitude";
pub const COL_LONGITUDE: &str = "Longitude";
/// Optional ground-truth column for ingested training tables
pub const COL_LABEL: &str = "Label";

/// Untyped tabular data with a header row
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Build a table, checking that every row matches the header width
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, ComputeError> {
        let headers: Vec<String> = headers.into_iter().map(|h| h.trim().to_string()).collect();
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != headers.len() {
                return Err(ComputeError::SchemaError(format!(
                    "row {} has {} fields, expected {}",
                    idx + 1,
                    row.len(),
                    headers.len()
                )));
            }
        }
        Ok(Self { headers, rows })
    }

    /// Parse comma-separated text whose first line is the header row
    pub fn from_csv(text: &str) -> Result<Self, ComputeError> {
        let mut lines = text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty());

        let header_line = lines
            .next()
            .ok_or_else(|| ComputeError::SchemaError("missing header row".to_string()))?;
        let headers = split_csv_line(header_line, 1)?;

        let mut rows = Vec::new();
        for (idx, line) in lines.enumerate() {
            rows.push(split_csv_line(line, idx + 2)?);
        }

        Self::new(headers, rows)
    }

    /// Parse a JSON array of flat objects.
    ///
    /// Headers are the union of record keys; absent keys and nulls become
    /// empty cells.
    pub fn from_json_records(json: &str) -> Result<Self, ComputeError> {
        let records: Vec<serde_json::Map<String, Value>> = serde_json::from_str(json)?;

        let mut headers: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !headers.iter().any(|h| h == key) {
                    headers.push(key.clone());
                }
            }
        }

        let mut rows = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            let mut row = Vec::with_capacity(headers.len());
            for header in &headers {
                let cell = match record.get(header) {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    Some(other) => {
                        return Err(ComputeError::SchemaError(format!(
                            "record {} field '{}' has unsupported value {}",
                            idx + 1,
                            header,
                            other
                        )));
                    }
                };
                row.push(cell);
            }
            rows.push(row);
        }

        Self::new(headers, rows)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by exact (trimmed) name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Position of a required column, or a schema error naming it
    pub fn require_column(&self, name: &str) -> Result<usize, ComputeError> {
        self.column_index(name)
            .ok_or_else(|| ComputeError::SchemaError(format!("missing required column '{name}'")))
    }
}

/// Split one CSV line, honouring double-quoted fields and `""` escapes
fn split_csv_line(line: &str, line_num: usize) -> Result<Vec<String>, ComputeError> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => {
                fields.push(field.trim().to_string());
                field.clear();
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(ComputeError::SchemaError(format!(
            "unterminated quoted field on line {line_num}"
        )));
    }
    fields.push(field.trim().to_string());

    Ok(fields)
}
