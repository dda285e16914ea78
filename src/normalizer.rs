//! Reading normalization
//!
//! This module turns raw tables into typed samples and location fixes.
//! - Required columns checked up front (the whole batch fails fast)
//! - Values parsed and range-checked per channel
//! - Output sorted by timestamp

use crate::error::ComputeError;
use crate::schema::{
    RawTable, COL_BPM, COL_GSR_VOLTAGE, COL_LABEL, COL_LATITUDE, COL_LONGITUDE, COL_RAW_VALUE,
    COL_TEMPERATURE, COL_TIMESTAMP,
};
use crate::types::{Cardiac, GeoFix, Label, LabeledSample, Sample};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::debug;

pub const MAX_HEART_RATE_BPM: f64 = 300.0;
pub const MAX_GSR_VOLTAGE: f64 = 5.0;
pub const MIN_TEMPERATURE_C: f64 = -50.0;
pub const MAX_TEMPERATURE_C: f64 = 100.0;

/// Naive datetime layouts accepted besides RFC 3339 (interpreted as UTC)
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Column positions resolved once per batch
struct ReadingColumns {
    timestamp: usize,
    cardiac: CardiacColumn,
    gsr_voltage: usize,
    temperature: usize,
}

enum CardiacColumn {
    Bpm(usize),
    RawValue(usize),
}

/// Normalizer for converting raw tables into typed records
pub struct Normalizer;

impl Normalizer {
    /// Normalize a reading table into samples sorted by timestamp
    pub fn normalize_readings(table: &RawTable) -> Result<Vec<Sample>, ComputeError> {
        let columns = resolve_reading_columns(table)?;

        let mut samples = table
            .rows()
            .iter()
            .enumerate()
            .map(|(idx, row)| parse_sample(row, idx + 1, &columns))
            .collect::<Result<Vec<_>, _>>()?;

        samples.sort_by_key(|s| s.timestamp);
        debug!("normalized {} readings", samples.len());

        Ok(samples)
    }

    /// Normalize a reading table that also carries a `Label` column
    pub fn normalize_labeled(table: &RawTable) -> Result<Vec<LabeledSample>, ComputeError> {
        let columns = resolve_reading_columns(table)?;
        let label_col = table.require_column(COL_LABEL)?;

        let mut labeled = table
            .rows()
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                let sample = parse_sample(row, idx + 1, &columns)?;
                let label = parse_label(&row[label_col]).ok_or_else(|| {
                    ComputeError::SchemaError(format!(
                        "row {}: invalid label '{}'",
                        idx + 1,
                        row[label_col]
                    ))
                })?;
                Ok(LabeledSample { sample, label })
            })
            .collect::<Result<Vec<_>, ComputeError>>()?;

        labeled.sort_by_key(|l| l.sample.timestamp);
        debug!("normalized {} labeled readings", labeled.len());

        Ok(labeled)
    }

    /// Normalize a location table into fixes sorted by timestamp
    pub fn normalize_locations(table: &RawTable) -> Result<Vec<GeoFix>, ComputeError> {
        let ts_col = table.require_column(COL_TIMESTAMP)?;
        let lat_col = table.require_column(COL_LATITUDE)?;
        let lon_col = table.require_column(COL_LONGITUDE)?;

        let mut fixes = Vec::with_capacity(table.len());
        for (idx, row) in table.rows().iter().enumerate() {
            let row_num = idx + 1;
            let timestamp = require_timestamp(&row[ts_col], row_num)?;
            let latitude = parse_in_range(&row[lat_col], COL_LATITUDE, row_num, -90.0, 90.0)?;
            let longitude = parse_in_range(&row[lon_col], COL_LONGITUDE, row_num, -180.0, 180.0)?;
            fixes.push(GeoFix {
                timestamp,
                latitude,
                longitude,
            });
        }

        fixes.sort_by_key(|f| f.timestamp);
        debug!("normalized {} location fixes", fixes.len());

        Ok(fixes)
    }
}

/// Parse a timestamp cell.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`, the
/// spreadsheet `M/D/YYYY H:MM:SS` layout, and bare dates. Naive values are UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parse a label cell given as a code (`0`/`1`/`2`) or a name
pub fn parse_label(value: &str) -> Option<Label> {
    let value = value.trim();
    if let Ok(code) = value.parse::<u8>() {
        return Label::from_code(code);
    }
    match value.to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
        "normal" => Some(Label::Normal),
        "low_stress" | "lowstress" => Some(Label::LowStress),
        "panic" => Some(Label::Panic),
        _ => None,
    }
}

fn resolve_reading_columns(table: &RawTable) -> Result<ReadingColumns, ComputeError> {
    let timestamp = table.require_column(COL_TIMESTAMP)?;
    let gsr_voltage = table.require_column(COL_GSR_VOLTAGE)?;
    let temperature = table.require_column(COL_TEMPERATURE)?;

    let cardiac = match (table.column_index(COL_BPM), table.column_index(COL_RAW_VALUE)) {
        (Some(idx), None) => CardiacColumn::Bpm(idx),
        (None, Some(idx)) => CardiacColumn::RawValue(idx),
        (Some(_), Some(_)) => {
            return Err(ComputeError::SchemaError(format!(
                "table has both '{COL_BPM}' and '{COL_RAW_VALUE}' columns"
            )));
        }
        (None, None) => {
            return Err(ComputeError::SchemaError(format!(
                "missing required column '{COL_BPM}' or '{COL_RAW_VALUE}'"
            )));
        }
    };

    Ok(ReadingColumns {
        timestamp,
        cardiac,
        gsr_voltage,
        temperature,
    })
}

fn parse_sample(
    row: &[String],
    row_num: usize,
    columns: &ReadingColumns,
) -> Result<Sample, ComputeError> {
    let timestamp = require_timestamp(&row[columns.timestamp], row_num)?;

    let cardiac = match columns.cardiac {
        CardiacColumn::Bpm(idx) => {
            let bpm = parse_in_range(&row[idx], COL_BPM, row_num, 0.0, MAX_HEART_RATE_BPM)?;
            // Sensors may report fractional rates; the sample stores whole beats
            Cardiac::Bpm(bpm.round() as u16)
        }
        CardiacColumn::RawValue(idx) => {
            let raw = parse_in_range(&row[idx], COL_RAW_VALUE, row_num, 0.0, f64::MAX)?;
            Cardiac::RawValue(raw)
        }
    };

    let gsr_voltage = parse_in_range(
        &row[columns.gsr_voltage],
        COL_GSR_VOLTAGE,
        row_num,
        0.0,
        MAX_GSR_VOLTAGE,
    )?;
    let temperature_c = parse_in_range(
        &row[columns.temperature],
        COL_TEMPERATURE,
        row_num,
        MIN_TEMPERATURE_C,
        MAX_TEMPERATURE_C,
    )?;

    Ok(Sample {
        timestamp,
        cardiac,
        gsr_voltage,
        temperature_c,
    })
}

fn require_timestamp(value: &str, row_num: usize) -> Result<DateTime<Utc>, ComputeError> {
    parse_timestamp(value).ok_or_else(|| {
        ComputeError::SchemaError(format!(
            "row {row_num}: unparseable {COL_TIMESTAMP} '{value}'"
        ))
    })
}

fn parse_in_range(
    value: &str,
    column: &str,
    row_num: usize,
    min: f64,
    max: f64,
) -> Result<f64, ComputeError> {
    let parsed: f64 = value.trim().parse().map_err(|_| {
        ComputeError::SchemaError(format!("row {row_num}: invalid {column} '{value}'"))
    })?;

    if !parsed.is_finite() || parsed < min || parsed > max {
        return Err(ComputeError::SchemaError(format!(
            "row {row_num}: {column} {parsed} outside [{min}, {max}]"
        )));
    }

    Ok(parsed)
}
