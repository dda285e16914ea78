//! Monitor configuration
//!
//! One JSON document describes a deployment: the safe zone, the labeling
//! regime used to synthesize training data, classifier parameters, and where
//! the model artifact lives.

use crate::classifier::ClassifierConfig;
use crate::error::ComputeError;
use crate::geofence::SafeZone;
use crate::labeling::LabelRules;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub zone: SafeZone,
    #[serde(default)]
    pub rules: LabelRules,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
}

impl MonitorConfig {
    /// Load and validate a configuration document
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: MonitorConfig = serde_json::from_str(json)?;
        config.rules.validate()?;
        if config.classifier.num_trees == 0 {
            return Err(ComputeError::InvalidConfig(
                "classifier.num_trees must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ComputeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
