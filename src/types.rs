//! Core types for the NoPanic pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: typed sensor samples, labels and predicted states, location fixes,
//! zone evaluations, and alert kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cardiac channel carried by a sample.
///
/// Deployments report either a computed heart rate or the raw pulse-sensor ADC
/// value, never both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardiac {
    /// Heart rate in beats per minute (0-300)
    Bpm(u16),
    /// Raw pulse sensor reading (ADC counts)
    RawValue(f64),
}

/// One typed physiological reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub cardiac: Cardiac,
    /// Galvanic skin response (volts, 0-5)
    pub gsr_voltage: f64,
    /// Body temperature (celsius, -50 to 100)
    pub temperature_c: f64,
}

impl Sample {
    pub fn heart_rate_bpm(&self) -> Option<u16> {
        match self.cardiac {
            Cardiac::Bpm(bpm) => Some(bpm),
            Cardiac::RawValue(_) => None,
        }
    }

    pub fn raw_value(&self) -> Option<f64> {
        match self.cardiac {
            Cardiac::RawValue(raw) => Some(raw),
            Cardiac::Bpm(_) => None,
        }
    }
}

/// Ground-truth state label (ordinal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Normal,
    LowStress,
    Panic,
}

impl Label {
    pub const ALL: [Label; 3] = [Label::Normal, Label::LowStress, Label::Panic];

    /// Numeric encoding stored in model artifacts
    pub fn code(&self) -> u8 {
        match self {
            Label::Normal => 0,
            Label::LowStress => 1,
            Label::Panic => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Label> {
        match code {
            0 => Some(Label::Normal),
            1 => Some(Label::LowStress),
            2 => Some(Label::Panic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Normal => "normal",
            Label::LowStress => "low_stress",
            Label::Panic => "panic",
        }
    }
}

/// A sample paired with its label
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub sample: Sample,
    pub label: Label,
}

/// Classifier output for one sample.
///
/// `Unknown` is reported when no usable model is loaded, when the model emits a
/// class code outside the label set, or when the sample lacks the channel the
/// model was trained on. It is never interchangeable with `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictedState {
    Normal,
    LowStress,
    Panic,
    Unknown,
}

impl PredictedState {
    pub fn from_code(code: u8) -> Self {
        Label::from_code(code).map_or(PredictedState::Unknown, PredictedState::from)
    }

    pub fn label(&self) -> Option<Label> {
        match self {
            PredictedState::Normal => Some(Label::Normal),
            PredictedState::LowStress => Some(Label::LowStress),
            PredictedState::Panic => Some(Label::Panic),
            PredictedState::Unknown => None,
        }
    }

    /// Panic condition for alerting; `None` when the state is unknown
    pub fn is_panic(&self) -> Option<bool> {
        self.label().map(|label| label == Label::Panic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictedState::Normal => "normal",
            PredictedState::LowStress => "low_stress",
            PredictedState::Panic => "panic",
            PredictedState::Unknown => "unknown",
        }
    }
}

impl From<Label> for PredictedState {
    fn from(label: Label) -> Self {
        match label {
            Label::Normal => PredictedState::Normal,
            Label::LowStress => PredictedState::LowStress,
            Label::Panic => PredictedState::Panic,
        }
    }
}

impl fmt::Display for PredictedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A location fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub timestamp: DateTime<Utc>,
    /// Degrees, -90 to 90
    pub latitude: f64,
    /// Degrees, -180 to 180
    pub longitude: f64,
}

/// Containment status of a fix relative to the safe zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneStatus {
    Inside,
    Outside,
}

/// Result of evaluating one fix against a safe zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneEvaluation {
    pub fix: GeoFix,
    pub distance_m: f64,
    pub status: ZoneStatus,
}

/// Alert kinds tracked independently by the decision unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Panic,
    GeofenceExit,
}

impl AlertKind {
    pub const ALL: [AlertKind; 2] = [AlertKind::Panic, AlertKind::GeofenceExit];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Panic => "panic",
            AlertKind::GeofenceExit => "geofence_exit",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_codes_round_trip() {
        for label in Label::ALL {
            assert_eq!(Label::from_code(label.code()), Some(label));
        }
    }

    #[test]
    fn test_unmapped_code_is_unknown() {
        assert_eq!(PredictedState::from_code(3), PredictedState::Unknown);
        assert_eq!(PredictedState::from_code(255), PredictedState::Unknown);
        assert_ne!(PredictedState::from_code(9), PredictedState::Normal);
    }

    #[test]
    fn test_unknown_has_no_panic_condition() {
        assert_eq!(PredictedState::Unknown.is_panic(), None);
        assert_eq!(PredictedState::Normal.is_panic(), Some(false));
        assert_eq!(PredictedState::Panic.is_panic(), Some(true));
    }

    #[test]
    fn test_sample_channel_accessors() {
        let sample = Sample {
            timestamp: Utc::now(),
            cardiac: Cardiac::RawValue(512.0),
            gsr_voltage: 0.8,
            temperature_c: 36.9,
        };
        assert_eq!(sample.raw_value(), Some(512.0));
        assert_eq!(sample.heart_rate_bpm(), None);
    }
}
