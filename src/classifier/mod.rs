//! Panic-state classifier
//!
//! A random forest trained on labeled samples (usually synthesized by the
//! label rules) that predicts one state per sample at runtime.
//!
//! The feature set is fixed at training time and travels with the model: a
//! sample that does not carry the model's cardiac channel is predicted as
//! `Unknown` rather than being coerced into the wrong vector position.

mod artifact;
mod forest;

pub use artifact::{LABEL_ENCODING, MODEL_FORMAT_VERSION};

use crate::error::ComputeError;
use crate::features::{self, FeatureSet, NUM_FEATURES};
use crate::types::{Label, LabeledSample, PredictedState, Sample};
use forest::{FeatureVector, Forest, TreeParams};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default forest size
pub const DEFAULT_NUM_TREES: usize = 100;

/// Training parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_num_trees")]
    pub num_trees: usize,
    /// Fixed seed for reproducible training. Defaults to 42 when omitted; an
    /// explicit `null` draws the seed from entropy.
    #[serde(default = "default_seed")]
    pub random_seed: Option<u64>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub feature_set: FeatureSet,
}

/// Seed used when a configuration does not name one
pub const DEFAULT_SEED: u64 = 42;

fn default_num_trees() -> usize {
    DEFAULT_NUM_TREES
}

fn default_seed() -> Option<u64> {
    Some(DEFAULT_SEED)
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            num_trees: default_num_trees(),
            random_seed: default_seed(),
            max_depth: None,
            feature_set: FeatureSet::Bpm,
        }
    }
}

/// Trained classifier
#[derive(Debug, Clone, PartialEq)]
pub struct PanicModel {
    feature_set: FeatureSet,
    forest: Forest,
    seed: u64,
    trained_samples: usize,
}

impl PanicModel {
    /// Train a forest on labeled samples.
    ///
    /// Fails with `InsufficientData` unless at least two label classes are
    /// present, and with `SchemaError` if any sample lacks the configured
    /// cardiac channel or carries a non-finite value.
    pub fn train(
        samples: &[LabeledSample],
        config: &ClassifierConfig,
    ) -> Result<PanicModel, ComputeError> {
        if config.num_trees == 0 {
            return Err(ComputeError::InvalidConfig(
                "num_trees must be greater than zero".to_string(),
            ));
        }

        let classes: BTreeSet<Label> = samples.iter().map(|s| s.label).collect();
        if classes.len() < 2 {
            return Err(ComputeError::InsufficientData(format!(
                "need at least 2 label classes, found {} across {} samples",
                classes.len(),
                samples.len()
            )));
        }

        let mut data: Vec<FeatureVector> = Vec::with_capacity(samples.len());
        let mut labels: Vec<u8> = Vec::with_capacity(samples.len());
        for (idx, labeled) in samples.iter().enumerate() {
            let vector = features::extract(config.feature_set, &labeled.sample).ok_or_else(|| {
                ComputeError::SchemaError(format!(
                    "training sample {} lacks the {} channel",
                    idx,
                    config.feature_set.as_str()
                ))
            })?;
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(ComputeError::SchemaError(format!(
                    "training sample {idx} has a non-finite feature value {vector:?}"
                )));
            }
            data.push(vector);
            labels.push(labeled.label.code());
        }

        let seed = config
            .random_seed
            .unwrap_or_else(|| rand::thread_rng().gen());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let params = TreeParams {
            max_depth: config.max_depth,
            max_features: ((NUM_FEATURES as f64).sqrt() as usize).max(1),
        };

        let forest = Forest::fit(&data, &labels, config.num_trees, &params, &mut rng);
        info!(
            "trained {} trees on {} samples ({} feature set, seed {})",
            config.num_trees,
            samples.len(),
            config.feature_set.as_str(),
            seed
        );

        Ok(PanicModel {
            feature_set: config.feature_set,
            forest,
            seed,
            trained_samples: samples.len(),
        })
    }

    /// Predict one state per sample; output length equals input length
    pub fn predict(&self, samples: &[Sample]) -> Vec<PredictedState> {
        let states: Vec<PredictedState> = samples.iter().map(|s| self.predict_one(s)).collect();
        debug!("classified {} samples", states.len());
        states
    }

    pub fn predict_one(&self, sample: &Sample) -> PredictedState {
        features::extract(self.feature_set, sample)
            .and_then(|x| self.forest.predict(&x))
            .map_or(PredictedState::Unknown, PredictedState::from_code)
    }

    /// Fraction of samples whose prediction matches the label.
    ///
    /// `Unknown` predictions count as misses. `None` for an empty set.
    pub fn accuracy(&self, samples: &[LabeledSample]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let hits = samples
            .iter()
            .filter(|s| self.predict_one(&s.sample).label() == Some(s.label))
            .count();
        Some(hits as f64 / samples.len() as f64)
    }

    pub fn feature_set(&self) -> FeatureSet {
        self.feature_set
    }

    pub fn feature_names(&self) -> [&'static str; NUM_FEATURES] {
        self.feature_set.names()
    }

    pub fn num_trees(&self) -> usize {
        self.forest.trees().len()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn trained_samples(&self) -> usize {
        self.trained_samples
    }
}

/// Shuffle and split a labeled corpus into `(train, test)`.
///
/// `test_ratio` must be in `(0, 1)`; the test set gets
/// `ceil(len * test_ratio)` samples.
pub fn train_test_split(
    samples: &[LabeledSample],
    test_ratio: f64,
    seed: u64,
) -> Result<(Vec<LabeledSample>, Vec<LabeledSample>), ComputeError> {
    if !(test_ratio > 0.0 && test_ratio < 1.0) {
        return Err(ComputeError::InvalidConfig(format!(
            "test ratio must be in (0, 1), got {test_ratio}"
        )));
    }

    let mut shuffled = samples.to_vec();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let test_len = (samples.len() as f64 * test_ratio).ceil() as usize;
    let train = shuffled.split_off(test_len);
    Ok((train, shuffled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labeling::{synthesize, LabelRules, SynthesisConfig};
    use crate::types::Cardiac;
    use chrono::Utc;

    fn corpus(n: usize) -> Vec<LabeledSample> {
        let config = SynthesisConfig {
            num_samples: n,
            ..Default::default()
        };
        synthesize(&LabelRules::bpm_regime(), &config).unwrap()
    }

    fn small_config() -> ClassifierConfig {
        ClassifierConfig {
            num_trees: 15,
            ..Default::default()
        }
    }

    fn sample(bpm: u16, gsr: f64, temp: f64) -> Sample {
        Sample {
            timestamp: Utc::now(),
            cardiac: Cardiac::Bpm(bpm),
            gsr_voltage: gsr,
            temperature_c: temp,
        }
    }

    #[test]
    fn test_single_class_is_insufficient() {
        let only_normal: Vec<LabeledSample> = corpus(300)
            .into_iter()
            .filter(|s| s.label == Label::Normal)
            .collect();

        let result = PanicModel::train(&only_normal, &small_config());
        assert!(matches!(result, Err(ComputeError::InsufficientData(_))));
    }

    #[test]
    fn test_empty_corpus_is_insufficient() {
        let result = PanicModel::train(&[], &small_config());
        assert!(matches!(result, Err(ComputeError::InsufficientData(_))));
    }

    #[test]
    fn test_zero_trees_rejected() {
        let config = ClassifierConfig {
            num_trees: 0,
            ..Default::default()
        };
        assert!(matches!(
            PanicModel::train(&corpus(100), &config),
            Err(ComputeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_non_finite_features_rejected() {
        let mut data = corpus(200);
        data[17].sample.gsr_voltage = f64::NAN;
        data[90].sample.temperature_c = f64::INFINITY;

        let err = PanicModel::train(&data, &small_config()).unwrap_err();
        assert!(matches!(err, ComputeError::SchemaError(msg) if msg.contains("sample 17")));
    }

    #[test]
    fn test_channel_mismatch_rejected_at_training() {
        let config = ClassifierConfig {
            feature_set: FeatureSet::RawValue,
            ..small_config()
        };
        assert!(matches!(
            PanicModel::train(&corpus(100), &config),
            Err(ComputeError::SchemaError(_))
        ));
    }

    #[test]
    fn test_learns_rule_regime() {
        let (train, test) = train_test_split(&corpus(1000), 0.2, 42).unwrap();
        let model = PanicModel::train(&train, &small_config()).unwrap();

        assert_eq!(model.num_trees(), 15);
        assert!(model.accuracy(&test).unwrap() > 0.9);

        assert_eq!(model.predict_one(&sample(155, 1.8, 38.2)), PredictedState::Panic);
        assert_eq!(model.predict_one(&sample(60, 0.2, 35.0)), PredictedState::Normal);
    }

    #[test]
    fn test_predict_preserves_length_and_handles_empty() {
        let model = PanicModel::train(&corpus(300), &small_config()).unwrap();

        assert!(model.predict(&[]).is_empty());

        let batch = vec![sample(70, 0.3, 36.0); 7];
        assert_eq!(model.predict(&batch).len(), 7);
    }

    #[test]
    fn test_wrong_channel_sample_is_unknown() {
        let model = PanicModel::train(&corpus(300), &small_config()).unwrap();
        let raw = Sample {
            cardiac: Cardiac::RawValue(3000.0),
            ..sample(0, 1.5, 38.0)
        };

        assert_eq!(model.predict_one(&raw), PredictedState::Unknown);
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let data = corpus(300);
        let a = PanicModel::train(&data, &small_config()).unwrap();
        let b = PanicModel::train(&data, &small_config()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_seed_default_independent_of_document_shape() {
        let partial: ClassifierConfig = serde_json::from_str(r#"{"num_trees": 50}"#).unwrap();
        let empty: ClassifierConfig = serde_json::from_str("{}").unwrap();
        let unseeded: ClassifierConfig =
            serde_json::from_str(r#"{"random_seed": null}"#).unwrap();

        assert_eq!(partial.random_seed, Some(DEFAULT_SEED));
        assert_eq!(empty, ClassifierConfig::default());
        assert_eq!(unseeded.random_seed, None);
    }

    #[test]
    fn test_split_sizes() {
        let (train, test) = train_test_split(&corpus(1000), 0.2, 1).unwrap();
        assert_eq!(test.len(), 200);
        assert_eq!(train.len(), 800);
        assert!(train_test_split(&corpus(10), 1.0, 1).is_err());
    }
}
