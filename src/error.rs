//! Error types for NoPanic

use thiserror::Error;

use crate::types::AlertKind;

/// Errors that can occur during computation
#[derive(Debug, Error)]
pub enum ComputeError {
    /// Missing or malformed input columns/values. The whole batch is rejected.
    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Insufficient training data: {0}")]
    InsufficientData(String),

    /// Model artifact missing, corrupt, or of an unrecognized version.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Transport failure reported by an alert sink
#[derive(Debug, Clone, Error)]
#[error("Failed to deliver {kind} notification: {reason}")]
pub struct NotificationError {
    pub kind: AlertKind,
    pub reason: String,
}

impl NotificationError {
    pub fn new(kind: AlertKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}
