//! Feature vector extraction
//!
//! Feature positions are bound to names here and nowhere else. A model records
//! the names it was trained with; inference rebuilds vectors through the same
//! table, so training and inference order cannot drift apart.

use crate::types::{Cardiac, Sample};
use serde::{Deserialize, Serialize};

pub const FEATURE_GSR_VOLTAGE: &str = "gsr_voltage";
pub const FEATURE_TEMPERATURE_C: &str = "temperature_c";
pub const FEATURE_HEART_RATE_BPM: &str = "heart_rate_bpm";
pub const FEATURE_RAW_VALUE: &str = "raw_value";

/// Number of features in every feature set
pub const NUM_FEATURES: usize = 3;

const BPM_FEATURES: [&str; NUM_FEATURES] =
    [FEATURE_GSR_VOLTAGE, FEATURE_TEMPERATURE_C, FEATURE_HEART_RATE_BPM];
const RAW_VALUE_FEATURES: [&str; NUM_FEATURES] =
    [FEATURE_GSR_VOLTAGE, FEATURE_TEMPERATURE_C, FEATURE_RAW_VALUE];

/// Which cardiac channel a model consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSet {
    /// `[gsr_voltage, temperature_c, heart_rate_bpm]`
    #[default]
    Bpm,
    /// `[gsr_voltage, temperature_c, raw_value]`
    RawValue,
}

impl FeatureSet {
    /// Canonical feature names in vector order
    pub fn names(&self) -> [&'static str; NUM_FEATURES] {
        match self {
            FeatureSet::Bpm => BPM_FEATURES,
            FeatureSet::RawValue => RAW_VALUE_FEATURES,
        }
    }

    /// Whether `names` is exactly this set's canonical order
    pub fn matches(&self, names: &[String]) -> bool {
        names.len() == NUM_FEATURES && names.iter().zip(self.names()).all(|(a, b)| a == b)
    }

    /// Name of the cardiac feature this set consumes
    pub fn cardiac_feature(&self) -> &'static str {
        self.names()[NUM_FEATURES - 1]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureSet::Bpm => "bpm",
            FeatureSet::RawValue => "raw_value",
        }
    }
}

/// Build the feature vector for a sample.
///
/// Returns `None` when the sample does not carry the cardiac channel this
/// feature set needs.
pub fn extract(feature_set: FeatureSet, sample: &Sample) -> Option<[f64; NUM_FEATURES]> {
    let cardiac = match feature_set {
        FeatureSet::Bpm => sample.heart_rate_bpm().map(f64::from)?,
        FeatureSet::RawValue => sample.raw_value()?,
    };
    Some([sample.gsr_voltage, sample.temperature_c, cardiac])
}

/// Name of the cardiac feature a sample carries
pub fn cardiac_feature(sample: &Sample) -> &'static str {
    match sample.cardiac {
        Cardiac::Bpm(_) => FEATURE_HEART_RATE_BPM,
        Cardiac::RawValue(_) => FEATURE_RAW_VALUE,
    }
}
