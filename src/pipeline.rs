//! Pipeline orchestration
//!
//! This module provides the session-level API for NoPanic. A
//! [`MonitorSession`] owns one session's safe zone, alert phases and
//! classifier, and runs one normalize → classify → geofence → decide pass per
//! refresh tick.
//!
//! Errors never escape a cycle: each is recorded in the [`CycleReport`] and
//! the stage it hit is skipped, leaving prior alert phases untouched.

use crate::alert::{dispatch, AlertSink, AlertState, Dispatched};
use crate::classifier::PanicModel;
use crate::config::MonitorConfig;
use crate::error::ComputeError;
use crate::features;
use crate::geofence::{self, SafeZone};
use crate::normalizer::Normalizer;
use crate::schema::RawTable;
use crate::types::{AlertKind, Cardiac, PredictedState, Sample, ZoneEvaluation, ZoneStatus};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Pipeline stage an issue was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Readings,
    Classifier,
    Locations,
    Notification,
}

/// A recovered error from one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleIssue {
    pub stage: Stage,
    pub message: String,
}

/// Per-sample classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub timestamp: DateTime<Utc>,
    pub state: PredictedState,
}

/// Classifier availability as seen by one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Everything one evaluation cycle produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub session_id: Uuid,
    pub cycle: u64,
    pub computed_at_utc: String,
    pub model: ModelStatus,
    pub classifications: Vec<Classification>,
    /// Most recent reading, as shown on the dashboard
    pub latest_sample: Option<Sample>,
    /// State of the most recent reading; `None` when the cycle had no readings
    pub current_state: Option<PredictedState>,
    /// Evaluation of the most recent location fix
    pub zone: Option<ZoneEvaluation>,
    pub alerts: AlertState,
    pub notifications: Vec<Dispatched>,
    pub issues: Vec<CycleIssue>,
}

enum ModelSlot {
    Loaded(PanicModel),
    Unavailable(String),
}

/// Monitoring state for one logged-in session
pub struct MonitorSession {
    session_id: Uuid,
    zone: SafeZone,
    alerts: AlertState,
    model: ModelSlot,
    cycles: u64,
}

impl MonitorSession {
    /// Start a session with no classifier loaded
    pub fn new(zone: SafeZone) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            zone,
            alerts: AlertState::new(),
            model: ModelSlot::Unavailable("no model loaded".to_string()),
            cycles: 0,
        }
    }

    /// Start a session from configuration, loading the model artifact if one
    /// is configured. A failed load leaves the session running with an
    /// unavailable classifier.
    pub fn from_config(config: &MonitorConfig) -> Self {
        let mut session = Self::new(config.zone);
        if let Some(path) = &config.model_path {
            if let Err(e) = session.load_model(path) {
                warn!("session {} starting without classifier: {e}", session.session_id);
            }
        }
        session
    }

    pub fn with_model(mut self, model: PanicModel) -> Self {
        self.model = ModelSlot::Loaded(model);
        self
    }

    /// Replace the classifier from an artifact file.
    ///
    /// On failure the previous model is dropped and the error is returned;
    /// subsequent cycles report `Unknown` states.
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> Result<(), ComputeError> {
        match PanicModel::load(path) {
            Ok(model) => {
                self.model = ModelSlot::Loaded(model);
                Ok(())
            }
            Err(e) => {
                self.model = ModelSlot::Unavailable(e.to_string());
                Err(e)
            }
        }
    }

    /// Operator update of the safe zone; applies from the next cycle
    pub fn set_zone(&mut self, zone: SafeZone) {
        debug!("session {} zone updated to {:?}", self.session_id, zone);
        self.zone = zone;
    }

    pub fn zone(&self) -> &SafeZone {
        &self.zone
    }

    pub fn alert_state(&self) -> &AlertState {
        &self.alerts
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn model(&self) -> Option<&PanicModel> {
        match &self.model {
            ModelSlot::Loaded(model) => Some(model),
            ModelSlot::Unavailable(_) => None,
        }
    }

    /// Classify samples with the session's model
    pub fn classify(&self, samples: &[Sample]) -> Result<Vec<PredictedState>, ComputeError> {
        match &self.model {
            ModelSlot::Loaded(model) => Ok(model.predict(samples)),
            ModelSlot::Unavailable(reason) => Err(ComputeError::ModelUnavailable(reason.clone())),
        }
    }

    /// Run one evaluation cycle.
    ///
    /// `locations` may be absent when the deployment has no GPS feed; the
    /// geofence alert is then left as it was.
    pub fn run_cycle(
        &mut self,
        readings: &RawTable,
        locations: Option<&RawTable>,
        sink: &mut dyn AlertSink,
    ) -> CycleReport {
        self.cycles += 1;
        let mut issues = Vec::new();
        let mut notifications = Vec::new();

        // Stage 1: normalize readings
        let samples = match Normalizer::normalize_readings(readings) {
            Ok(samples) => Some(samples),
            Err(e) => {
                warn!("cycle {}: readings rejected: {e}", self.cycles);
                issues.push(CycleIssue {
                    stage: Stage::Readings,
                    message: e.to_string(),
                });
                None
            }
        };

        // Stage 2: classify
        let mut classifications = Vec::new();
        let mut latest_sample = None;
        let mut current_state = None;
        if let Some(samples) = &samples {
            let states = match self.classify(samples) {
                Ok(states) => {
                    if let Some(message) = self.channel_mismatch(samples) {
                        warn!("cycle {}: {message}", self.cycles);
                        issues.push(CycleIssue {
                            stage: Stage::Classifier,
                            message,
                        });
                    }
                    states
                }
                Err(e) => {
                    warn!("cycle {}: {e}; reporting unknown states", self.cycles);
                    issues.push(CycleIssue {
                        stage: Stage::Classifier,
                        message: e.to_string(),
                    });
                    vec![PredictedState::Unknown; samples.len()]
                }
            };
            classifications = samples
                .iter()
                .zip(&states)
                .map(|(sample, state)| Classification {
                    timestamp: sample.timestamp,
                    state: *state,
                })
                .collect();
            latest_sample = samples.last().copied();
            current_state = states.last().copied();

            let decision = self
                .alerts
                .observe(AlertKind::Panic, current_state.and_then(|s| s.is_panic()));
            if let Some(sample) = &latest_sample {
                let detail = panic_detail(sample);
                notifications.extend(dispatch(sink, AlertKind::Panic, decision, &detail));
            }
        }

        // Stage 3: geofence
        let mut zone = None;
        if let Some(table) = locations {
            match Normalizer::normalize_locations(table) {
                Ok(fixes) => {
                    zone = fixes.last().map(|fix| geofence::evaluate(fix, &self.zone));
                    let condition = zone.map(|z| z.status == ZoneStatus::Outside);
                    let decision = self.alerts.observe(AlertKind::GeofenceExit, condition);
                    if let Some(evaluation) = &zone {
                        let detail = geofence_detail(evaluation, &self.zone);
                        notifications.extend(dispatch(
                            sink,
                            AlertKind::GeofenceExit,
                            decision,
                            &detail,
                        ));
                    }
                }
                Err(e) => {
                    warn!("cycle {}: locations rejected: {e}", self.cycles);
                    issues.push(CycleIssue {
                        stage: Stage::Locations,
                        message: e.to_string(),
                    });
                }
            }
        }

        for failed in notifications.iter().filter(|n| !n.delivered) {
            issues.push(CycleIssue {
                stage: Stage::Notification,
                message: failed.error.clone().unwrap_or_default(),
            });
        }

        debug!(
            "cycle {} done: {} readings, {} notifications, {} issues",
            self.cycles,
            classifications.len(),
            notifications.len(),
            issues.len()
        );

        CycleReport {
            session_id: self.session_id,
            cycle: self.cycles,
            computed_at_utc: Utc::now().to_rfc3339(),
            model: self.model_status(),
            classifications,
            latest_sample,
            current_state,
            zone,
            alerts: self.alerts,
            notifications,
            issues,
        }
    }

    /// Readings the loaded model cannot score because they carry the other
    /// cardiac channel
    fn channel_mismatch(&self, samples: &[Sample]) -> Option<String> {
        let expected = self.model()?.feature_set().cardiac_feature();
        let mismatched: Vec<&Sample> = samples
            .iter()
            .filter(|s| features::cardiac_feature(s) != expected)
            .collect();
        let first = mismatched.first()?;

        Some(format!(
            "model expects {expected} but {} of {} readings carry {}",
            mismatched.len(),
            samples.len(),
            features::cardiac_feature(first)
        ))
    }

    fn model_status(&self) -> ModelStatus {
        match &self.model {
            ModelSlot::Loaded(_) => ModelStatus {
                available: true,
                detail: None,
            },
            ModelSlot::Unavailable(reason) => ModelStatus {
                available: false,
                detail: Some(reason.clone()),
            },
        }
    }
}

fn panic_detail(sample: &Sample) -> String {
    let cardiac = match sample.cardiac {
        Cardiac::Bpm(bpm) => format!("{bpm} bpm"),
        Cardiac::RawValue(raw) => format!("raw {raw:.2}"),
    };
    format!(
        "Panic state detected at {}: {}, GSR {:.4} V, temperature {:.2} °C",
        sample.timestamp.to_rfc3339(),
        cardiac,
        sample.gsr_voltage,
        sample.temperature_c
    )
}

fn geofence_detail(evaluation: &ZoneEvaluation, zone: &SafeZone) -> String {
    let (lat, lon) = zone.center();
    format!(
        "Left safe zone at {}: {:.1} m from ({lat:.6}, {lon:.6}), radius {:.1} m",
        evaluation.fix.timestamp.to_rfc3339(),
        evaluation.distance_m,
        zone.radius_m()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertPhase, MemorySink};
    use crate::classifier::ClassifierConfig;
    use crate::labeling::{synthesize, LabelRules, SynthesisConfig};

    fn trained_model() -> PanicModel {
        let corpus = synthesize(
            &LabelRules::bpm_regime(),
            &SynthesisConfig {
                num_samples: 600,
                ..Default::default()
            },
        )
        .unwrap();
        let config = ClassifierConfig {
            num_trees: 15,
            ..Default::default()
        };
        PanicModel::train(&corpus, &config).unwrap()
    }

    fn readings(bpm: u16, gsr: f64, temp: f64) -> RawTable {
        let csv = format!(
            "Timestamp,BPM,GSR Voltage,Temperature\n\
             2025-03-01 10:00:00,72,0.30,36.1\n\
             2025-03-01 10:00:05,{bpm},{gsr},{temp}\n"
        );
        RawTable::from_csv(&csv).unwrap()
    }

    fn calm() -> RawTable {
        readings(70, 0.25, 35.8)
    }

    fn panicked() -> RawTable {
        readings(150, 1.6, 38.0)
    }

    fn location(lat: f64, lon: f64) -> RawTable {
        let csv = format!("Timestamp,Latitude,Longitude\n2025-03-01 10:00:05,{lat},{lon}\n");
        RawTable::from_csv(&csv).unwrap()
    }

    fn home() -> RawTable {
        location(12.753682, 80.197107)
    }

    fn away() -> RawTable {
        location(12.760000, 80.197107)
    }

    #[test]
    fn test_panic_notifies_once_per_episode() {
        let mut session = MonitorSession::new(SafeZone::default()).with_model(trained_model());
        let mut sink = MemorySink::new();

        let sequence = [panicked(), panicked(), calm(), panicked()];
        let notified: Vec<bool> = sequence
            .iter()
            .map(|table| !session.run_cycle(table, None, &mut sink).notifications.is_empty())
            .collect();

        assert_eq!(notified, vec![true, false, false, true]);
        assert_eq!(sink.sent.len(), 2);
        assert!(sink.sent[0].1.contains("150 bpm"));
    }

    #[test]
    fn test_missing_model_reports_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig {
            model_path: Some(dir.path().join("absent-model.json")),
            ..Default::default()
        };
        let mut session = MonitorSession::from_config(&config);
        let mut sink = MemorySink::new();

        let report = session.run_cycle(&panicked(), None, &mut sink);

        assert!(!report.model.available);
        assert_eq!(report.classifications.len(), 2);
        assert!(report
            .classifications
            .iter()
            .all(|c| c.state == PredictedState::Unknown));
        assert_eq!(report.current_state, Some(PredictedState::Unknown));
        assert!(report.issues.iter().any(|i| i.stage == Stage::Classifier));
        assert!(sink.sent.is_empty());
        assert_eq!(session.alert_state().phase(AlertKind::Panic), AlertPhase::Quiescent);
    }

    #[test]
    fn test_channel_mismatch_is_reported() {
        let mut session = MonitorSession::new(SafeZone::default()).with_model(trained_model());
        let mut sink = MemorySink::new();
        let raw = RawTable::from_csv(
            "Timestamp,Raw Value,GSR Voltage,Temperature\n\
             2025-03-01 10:00:00,2900,1.6,38.0\n",
        )
        .unwrap();

        let report = session.run_cycle(&raw, None, &mut sink);

        assert!(report.model.available);
        assert_eq!(report.current_state, Some(PredictedState::Unknown));
        let issue = report
            .issues
            .iter()
            .find(|i| i.stage == Stage::Classifier)
            .unwrap();
        assert!(issue.message.contains("heart_rate_bpm"));
        assert!(issue.message.contains("raw_value"));
        assert!(sink.sent.is_empty());

        // Matching readings raise no issue
        let next = session.run_cycle(&calm(), None, &mut sink);
        assert!(next.issues.is_empty());
    }

    #[test]
    fn test_geofence_exit_and_return() {
        let mut session = MonitorSession::new(SafeZone::default()).with_model(trained_model());
        let mut sink = MemorySink::new();

        let inside = session.run_cycle(&calm(), Some(&home()), &mut sink);
        let zone = inside.zone.unwrap();
        assert_eq!(zone.status, ZoneStatus::Inside);
        assert!(zone.distance_m < 1e-6);

        let out = session.run_cycle(&calm(), Some(&away()), &mut sink);
        assert_eq!(out.notifications.len(), 1);
        assert_eq!(out.notifications[0].kind, AlertKind::GeofenceExit);

        let still_out = session.run_cycle(&calm(), Some(&away()), &mut sink);
        assert!(still_out.notifications.is_empty());

        session.run_cycle(&calm(), Some(&home()), &mut sink);
        let out_again = session.run_cycle(&calm(), Some(&away()), &mut sink);
        assert_eq!(out_again.notifications.len(), 1);
    }

    #[test]
    fn test_zone_update_applies_next_cycle() {
        let mut session = MonitorSession::new(SafeZone::default());
        let mut sink = MemorySink::new();

        let before = session.run_cycle(&calm(), Some(&away()), &mut sink);
        assert_eq!(before.zone.unwrap().status, ZoneStatus::Outside);

        session.set_zone(SafeZone::new(12.753682, 80.197107, 1_000.0).unwrap());
        let after = session.run_cycle(&calm(), Some(&away()), &mut sink);
        assert_eq!(after.zone.unwrap().status, ZoneStatus::Inside);
    }

    #[test]
    fn test_schema_error_keeps_prior_state() {
        let mut session = MonitorSession::new(SafeZone::default()).with_model(trained_model());
        let mut sink = MemorySink::new();
        session.run_cycle(&panicked(), None, &mut sink);

        let broken = RawTable::from_csv("Timestamp,BPM\n2025-03-01 10:00:00,150\n").unwrap();
        let report = session.run_cycle(&broken, None, &mut sink);

        assert!(report.issues.iter().any(|i| i.stage == Stage::Readings));
        assert!(report.classifications.is_empty());
        assert_eq!(report.alerts.phase(AlertKind::Panic), AlertPhase::Notified);

        // Next cycle runs normally and the episode is still debounced
        let next = session.run_cycle(&panicked(), None, &mut sink);
        assert!(next.issues.is_empty());
        assert!(next.notifications.is_empty());
    }

    #[test]
    fn test_sink_failure_does_not_abort_cycle() {
        let mut session = MonitorSession::new(SafeZone::default()).with_model(trained_model());
        let mut sink = MemorySink::failing("smtp unreachable");

        let report = session.run_cycle(&panicked(), Some(&away()), &mut sink);

        assert_eq!(report.notifications.len(), 2);
        assert!(report.notifications.iter().all(|n| !n.delivered));
        assert_eq!(
            report
                .issues
                .iter()
                .filter(|i| i.stage == Stage::Notification)
                .count(),
            2
        );
        assert_eq!(report.cycle, 1);

        let next = session.run_cycle(&calm(), Some(&home()), &mut sink);
        assert_eq!(next.cycle, 2);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let model = trained_model();
        let mut first = MonitorSession::new(SafeZone::default()).with_model(model.clone());
        let mut second = MonitorSession::new(SafeZone::default()).with_model(model);
        let mut sink = MemorySink::new();

        first.run_cycle(&panicked(), None, &mut sink);

        assert_ne!(first.session_id(), second.session_id());
        assert_eq!(second.alert_state().phase(AlertKind::Panic), AlertPhase::Quiescent);
        assert!(!second.run_cycle(&panicked(), None, &mut sink).notifications.is_empty());
    }

    #[test]
    fn test_report_serializes_unknown_distinctly() {
        let mut session = MonitorSession::new(SafeZone::default());
        let report = session.run_cycle(&calm(), None, &mut MemorySink::new());
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();

        assert_eq!(json["current_state"], "unknown");
        assert_eq!(json["model"]["available"], false);
    }
}
