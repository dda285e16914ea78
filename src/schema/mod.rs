//! Tabular input schema
//!
//! This module defines the in-memory table handed over by the ingestion
//! transport (published sheet CSV or JSON records) and the column names the
//! normalizer expects.

mod table;

pub use table::*;
