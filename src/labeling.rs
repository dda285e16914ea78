//! Rule-based labeling
//!
//! This module produces ground-truth labels for training corpora from fixed
//! threshold predicates, and synthesizes labeled corpora from seeded uniform
//! channel draws. It is never used at inference time.

use crate::error::ComputeError;
use crate::features::FeatureSet;
use crate::types::{Cardiac, Label, LabeledSample, Sample};
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Sample channel a predicate reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HeartRateBpm,
    RawValue,
    GsrVoltage,
    TemperatureC,
}

impl Metric {
    /// Channel value, or `None` if the sample does not carry it
    pub fn value(&self, sample: &Sample) -> Option<f64> {
        match self {
            Metric::HeartRateBpm => sample.heart_rate_bpm().map(f64::from),
            Metric::RawValue => sample.raw_value(),
            Metric::GsrVoltage => Some(sample.gsr_voltage),
            Metric::TemperatureC => Some(sample.temperature_c),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
}

impl Comparator {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::GreaterThan => value > threshold,
            Comparator::GreaterOrEqual => value >= threshold,
            Comparator::LessThan => value < threshold,
            Comparator::LessOrEqual => value <= threshold,
        }
    }
}

/// One `metric comparator threshold` predicate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub metric: Metric,
    pub comparator: Comparator,
    pub threshold: f64,
}

impl Predicate {
    pub fn new(metric: Metric, comparator: Comparator, threshold: f64) -> Self {
        Self {
            metric,
            comparator,
            threshold,
        }
    }

    /// A predicate over a channel the sample lacks is not satisfied
    pub fn holds(&self, sample: &Sample) -> bool {
        self.metric
            .value(sample)
            .is_some_and(|value| self.comparator.holds(value, self.threshold))
    }
}

/// Threshold regime used to label training samples.
///
/// All `panic` predicates must hold for `Panic`. Otherwise, if `low_stress` is
/// non-empty and all of its predicates hold, the label is `LowStress`.
/// Everything else is `Normal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRules {
    pub panic: Vec<Predicate>,
    #[serde(default)]
    pub low_stress: Vec<Predicate>,
}

impl Default for LabelRules {
    fn default() -> Self {
        Self::bpm_regime()
    }
}

impl LabelRules {
    /// Heart-rate regime: bpm > 120, gsr > 0.5 V, temperature > 36.5 °C
    pub fn bpm_regime() -> Self {
        Self {
            panic: vec![
                Predicate::new(Metric::HeartRateBpm, Comparator::GreaterThan, 120.0),
                Predicate::new(Metric::GsrVoltage, Comparator::GreaterThan, 0.5),
                Predicate::new(Metric::TemperatureC, Comparator::GreaterThan, 36.5),
            ],
            low_stress: Vec::new(),
        }
    }

    /// Build a rule set, rejecting an empty panic predicate set
    pub fn new(panic: Vec<Predicate>, low_stress: Vec<Predicate>) -> Result<Self, ComputeError> {
        let rules = Self { panic, low_stress };
        rules.validate()?;
        Ok(rules)
    }

    pub fn with_low_stress(mut self, low_stress: Vec<Predicate>) -> Self {
        self.low_stress = low_stress;
        self
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.panic.is_empty() {
            return Err(ComputeError::InvalidConfig(
                "label rules need at least one panic predicate".to_string(),
            ));
        }
        if let Some(p) = self
            .panic
            .iter()
            .chain(&self.low_stress)
            .find(|p| !p.threshold.is_finite())
        {
            return Err(ComputeError::InvalidConfig(format!(
                "non-finite threshold for {:?}",
                p.metric
            )));
        }
        Ok(())
    }

    /// Label a sample
    pub fn label(&self, sample: &Sample) -> Label {
        if !self.panic.is_empty() && self.panic.iter().all(|p| p.holds(sample)) {
            Label::Panic
        } else if !self.low_stress.is_empty() && self.low_stress.iter().all(|p| p.holds(sample)) {
            Label::LowStress
        } else {
            Label::Normal
        }
    }

    pub fn label_all(&self, samples: &[Sample]) -> Vec<LabeledSample> {
        samples
            .iter()
            .map(|sample| LabeledSample {
                sample: *sample,
                label: self.label(sample),
            })
            .collect()
    }
}

/// Channel ranges and size of a synthesized corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub num_samples: usize,
    pub seed: u64,
    pub feature_set: FeatureSet,
    pub bpm_range: Range<u16>,
    pub raw_value_range: Range<f64>,
    pub gsr_range: Range<f64>,
    pub temperature_range: Range<f64>,
    /// Time of the first sample; later samples follow at one-second spacing
    pub start: DateTime<Utc>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            num_samples: 1000,
            seed: 42,
            feature_set: FeatureSet::Bpm,
            bpm_range: 40..160,
            raw_value_range: 0.0..4096.0,
            gsr_range: 0.1..2.0,
            temperature_range: 34.5..38.5,
            start: DateTime::<Utc>::default(),
        }
    }
}

/// Draw a labeled corpus. Same config and rules produce the same corpus.
pub fn synthesize(
    rules: &LabelRules,
    config: &SynthesisConfig,
) -> Result<Vec<LabeledSample>, ComputeError> {
    rules.validate()?;
    if config.bpm_range.is_empty()
        || config.raw_value_range.is_empty()
        || config.gsr_range.is_empty()
        || config.temperature_range.is_empty()
    {
        return Err(ComputeError::InvalidConfig(
            "synthesis ranges must be non-empty".to_string(),
        ));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut corpus = Vec::with_capacity(config.num_samples);

    for i in 0..config.num_samples {
        let cardiac = match config.feature_set {
            FeatureSet::Bpm => Cardiac::Bpm(rng.gen_range(config.bpm_range.clone())),
            FeatureSet::RawValue => {
                Cardiac::RawValue(rng.gen_range(config.raw_value_range.clone()))
            }
        };
        let sample = Sample {
            timestamp: config.start + Duration::seconds(i as i64),
            cardiac,
            gsr_voltage: rng.gen_range(config.gsr_range.clone()),
            temperature_c: rng.gen_range(config.temperature_range.clone()),
        };
        corpus.push(LabeledSample {
            sample,
            label: rules.label(&sample),
        });
    }

    Ok(corpus)
}
