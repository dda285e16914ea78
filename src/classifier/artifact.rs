//! Model artifact encoding
//!
//! Artifacts are JSON documents tagged with `format_version`. The tag is
//! checked before anything else is decoded; unknown versions are refused
//! outright. Every failure on this path is reported as `ModelUnavailable`.

use super::forest::{DecisionTree, Forest};
use super::PanicModel;
use crate::error::ComputeError;
use crate::features::FeatureSet;
use crate::types::Label;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Current artifact format version
pub const MODEL_FORMAT_VERSION: &str = "nopanic.model.v1";

/// Label names by class code, as written into every artifact
pub const LABEL_ENCODING: [&str; 3] = ["normal", "low_stress", "panic"];

#[derive(Debug, Serialize, Deserialize)]
struct ModelArtifact {
    format_version: String,
    feature_set: FeatureSet,
    feature_names: Vec<String>,
    label_encoding: Vec<String>,
    seed: u64,
    trained_samples: usize,
    trees: Vec<DecisionTree>,
}

impl PanicModel {
    /// Encode the model as a versioned artifact
    pub fn serialize(&self) -> Vec<u8> {
        let artifact = ModelArtifact {
            format_version: MODEL_FORMAT_VERSION.to_string(),
            feature_set: self.feature_set,
            feature_names: self.feature_names().iter().map(|s| s.to_string()).collect(),
            label_encoding: Label::ALL.iter().map(|l| l.as_str().to_string()).collect(),
            seed: self.seed,
            trained_samples: self.trained_samples,
            trees: self.forest.trees().to_vec(),
        };
        // Plain structs of numbers and strings; encoding cannot fail
        serde_json::to_vec(&artifact).unwrap_or_default()
    }

    /// Decode an artifact produced by [`PanicModel::serialize`]
    pub fn deserialize(bytes: &[u8]) -> Result<PanicModel, ComputeError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| unavailable(format!("artifact is not valid JSON: {e}")))?;

        match value.get("format_version").and_then(|v| v.as_str()) {
            Some(MODEL_FORMAT_VERSION) => {}
            Some(other) => {
                return Err(unavailable(format!(
                    "unsupported artifact version '{other}' (expected {MODEL_FORMAT_VERSION})"
                )));
            }
            None => return Err(unavailable("artifact has no format_version tag")),
        }

        let artifact: ModelArtifact = serde_json::from_value(value)
            .map_err(|e| unavailable(format!("malformed artifact: {e}")))?;

        if !artifact.feature_set.matches(&artifact.feature_names) {
            return Err(unavailable(format!(
                "feature names {:?} do not match the {} feature order {:?}",
                artifact.feature_names,
                artifact.feature_set.as_str(),
                artifact.feature_set.names()
            )));
        }
        if artifact.label_encoding != LABEL_ENCODING {
            return Err(unavailable(format!(
                "unrecognized label encoding {:?}",
                artifact.label_encoding
            )));
        }
        if artifact.trees.is_empty() {
            return Err(unavailable("artifact contains no trees"));
        }
        for (idx, tree) in artifact.trees.iter().enumerate() {
            tree.validate()
                .map_err(|e| unavailable(format!("tree {idx}: {e}")))?;
        }

        Ok(PanicModel {
            feature_set: artifact.feature_set,
            forest: Forest::from_trees(artifact.trees),
            seed: artifact.seed,
            trained_samples: artifact.trained_samples,
        })
    }

    /// Write the artifact to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ComputeError> {
        let path = path.as_ref();
        fs::write(path, self.serialize())
            .map_err(|e| unavailable(format!("cannot write {}: {e}", path.display())))?;
        info!("saved model artifact to {}", path.display());
        Ok(())
    }

    /// Read an artifact from a file
    pub fn load(path: impl AsRef<Path>) -> Result<PanicModel, ComputeError> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .map_err(|e| unavailable(format!("cannot read {}: {e}", path.display())))?;
        let model = Self::deserialize(&bytes)?;
        info!(
            "loaded model artifact from {} ({} trees, {} feature set)",
            path.display(),
            model.num_trees(),
            model.feature_set.as_str()
        );
        Ok(model)
    }
}

fn unavailable(msg: impl Into<String>) -> ComputeError {
    ComputeError::ModelUnavailable(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierConfig;
    use crate::labeling::{synthesize, LabelRules, SynthesisConfig};
    use crate::types::{Cardiac, PredictedState, Sample};
    use chrono::Utc;

    fn trained_model() -> PanicModel {
        let corpus = synthesize(
            &LabelRules::bpm_regime(),
            &SynthesisConfig {
                num_samples: 400,
                ..Default::default()
            },
        )
        .unwrap();
        let config = ClassifierConfig {
            num_trees: 10,
            ..Default::default()
        };
        PanicModel::train(&corpus, &config).unwrap()
    }

    fn grid_batch() -> Vec<Sample> {
        let mut batch = Vec::new();
        for bpm in (40..160).step_by(15) {
            for gsr in [0.2, 0.6, 1.4] {
                for temp in [35.0, 36.6, 38.0] {
                    batch.push(Sample {
                        timestamp: Utc::now(),
                        cardiac: Cardiac::Bpm(bpm),
                        gsr_voltage: gsr,
                        temperature_c: temp,
                    });
                }
            }
        }
        batch
    }

    #[test]
    fn test_round_trip_predicts_identically() {
        let model = trained_model();
        let restored = PanicModel::deserialize(&model.serialize()).unwrap();

        let batch = grid_batch();
        assert_eq!(model.predict(&batch), restored.predict(&batch));
        assert_eq!(model, restored);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&trained_model().serialize()).unwrap();
        value["format_version"] = serde_json::json!("nopanic.model.v0");
        let bytes = serde_json::to_vec(&value).unwrap();

        let err = PanicModel::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, ComputeError::ModelUnavailable(msg) if msg.contains("v0")));
    }

    #[test]
    fn test_missing_version_rejected() {
        let result = PanicModel::deserialize(br#"{"trees": []}"#);
        assert!(matches!(result, Err(ComputeError::ModelUnavailable(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        let result = PanicModel::deserialize(b"\x80\x04\x95 pickle bytes");
        assert!(matches!(result, Err(ComputeError::ModelUnavailable(_))));
    }

    #[test]
    fn test_reordered_features_rejected() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&trained_model().serialize()).unwrap();
        value["feature_names"] =
            serde_json::json!(["heart_rate_bpm", "gsr_voltage", "temperature_c"]);
        let bytes = serde_json::to_vec(&value).unwrap();

        assert!(matches!(
            PanicModel::deserialize(&bytes),
            Err(ComputeError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_unmapped_leaf_class_predicts_unknown() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&trained_model().serialize()).unwrap();
        let leaf_only = serde_json::json!({"nodes": [{"kind": "leaf", "class": 7}]});
        value["trees"] = serde_json::json!([leaf_only]);
        let bytes = serde_json::to_vec(&value).unwrap();

        let model = PanicModel::deserialize(&bytes).unwrap();
        let states = model.predict(&grid_batch());
        assert!(states.iter().all(|s| *s == PredictedState::Unknown));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-model.json");
        let result = PanicModel::load(&path);
        assert!(matches!(result, Err(ComputeError::ModelUnavailable(_))));
    }

    #[test]
    fn test_save_and_load() {
        let model = trained_model();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        model.save(&path).unwrap();
        let loaded = PanicModel::load(&path).unwrap();

        assert_eq!(model.predict(&grid_batch()), loaded.predict(&grid_batch()));
    }
}
