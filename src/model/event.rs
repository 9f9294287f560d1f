//! Change events - the single normalized shape handed to subscribers

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Store gained or rewrote program data
    NewProgram,
    /// Best score improved
    Improvement,
    /// A program changed island
    Migration,
    /// A generation finished
    GenerationComplete,
    /// Lifecycle status changed
    StatusChange,
    /// A new experiment root was found
    ExperimentDiscovered,
}

impl EventType {
    /// Wire name (`new_program`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NewProgram => "new_program",
            Self::Improvement => "improvement",
            Self::Migration => "migration",
            Self::GenerationComplete => "generation_complete",
            Self::StatusChange => "status_change",
            Self::ExperimentDiscovered => "experiment_discovered",
        }
    }
}

/// "Re-fetch now" notification for one experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    /// Kind of change
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Experiment the change belongs to
    pub experiment_id: String,
    /// Seconds since the epoch
    pub timestamp: f64,
    /// Free-form payload (`source`, `file`, ...)
    pub data: Map<String, Value>,
}

impl ChangeEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn now(event_type: EventType, experiment_id: impl Into<String>) -> Self {
        Self {
            event_type,
            experiment_id: experiment_id.into(),
            timestamp: now_epoch_secs(),
            data: Map::new(),
        }
    }

    /// Attach one payload entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Current wall-clock time as fractional epoch seconds.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn now_epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
