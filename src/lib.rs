//! NoPanic - panic-state classification and geofence alerting for wearable
//! stress sensors
//!
//! NoPanic turns periodic sensor rows (heart rate or raw pulse value, GSR,
//! body temperature) and location fixes into alert decisions through a
//! deterministic pipeline: table normalization → state classification →
//! geofence evaluation → debounced alert decision.
//!
//! ## Modules
//!
//! - **Training**: rule-based labeling and corpus synthesis feeding a
//!   random-forest classifier with a versioned artifact format
//! - **Monitoring**: per-session evaluation cycles with isolated safe zone and
//!   alert state

pub mod alert;
pub mod classifier;
pub mod config;
pub mod error;
pub mod features;
pub mod geofence;
pub mod labeling;
pub mod normalizer;
pub mod pipeline;
pub mod schema;
pub mod types;

pub use alert::{decide, AlertPhase, AlertSink, AlertState, Decision};
pub use classifier::{train_test_split, ClassifierConfig, PanicModel, MODEL_FORMAT_VERSION};
pub use config::MonitorConfig;
pub use error::{ComputeError, NotificationError};
pub use features::FeatureSet;
pub use geofence::{evaluate, SafeZone};
pub use labeling::{synthesize, LabelRules, SynthesisConfig};
pub use normalizer::Normalizer;
pub use pipeline::{CycleReport, MonitorSession};
pub use schema::RawTable;

/// NoPanic version embedded in reports
pub const NOPANIC_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "nopanic";
