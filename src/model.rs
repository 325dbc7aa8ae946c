/// Core data types for the level monitoring service.
///
/// This module defines the shared domain model imported by all other modules:
/// measurements, alert state, alert messages and outcomes, and the error
/// taxonomy. It contains no I/O.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::alert::Policy;

// ---------------------------------------------------------------------------
// Measurement types
// ---------------------------------------------------------------------------

/// A single averaged sensor sample.
///
/// `raw_distance_cm` is measured from the sensor face and is never negative.
/// `level_cm` is relative to the datum (`sensor_height - distance`) and is
/// only present when a sensor height is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub time: DateTime<Utc>,
    pub raw_distance_cm: f64,
    pub level_cm: Option<f64>,
}

/// Which quantity of a measurement a policy compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// Datum-relative level (`sensor_height - distance`).
    Level,
    /// Raw sensor-relative distance.
    Distance,
}

impl Measurement {
    /// Returns the value a policy should evaluate, or `None` if a level is
    /// requested but the measurement was taken without a sensor height.
    pub fn value_for(&self, source: ValueSource) -> Option<f64> {
        match source {
            ValueSource::Level => self.level_cm,
            ValueSource::Distance => Some(self.raw_distance_cm),
        }
    }
}

// ---------------------------------------------------------------------------
// Alert types
// ---------------------------------------------------------------------------

/// Current on-disk schema version of [`AlertState`].
pub const ALERT_STATE_VERSION: u32 = 1;

/// Persisted record of when the last alert was actually dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub version: u32,
    pub last_alert_time: DateTime<Utc>,
}

impl AlertState {
    /// Far-past sentinel written on first run, so the first genuine alert is
    /// never held back by the cooldown.
    pub fn sentinel() -> Self {
        Self {
            version: ALERT_STATE_VERSION,
            // 2005-01-01T00:00:00Z
            last_alert_time: DateTime::from_timestamp(1_104_537_600, 0).unwrap_or_default(),
        }
    }
}

impl Default for AlertState {
    fn default() -> Self {
        Self::sentinel()
    }
}

/// A rendered alert, produced by `alert::evaluate`.
///
/// `policy` carries the bound(s) `value` was compared against.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub policy_name: String,
    pub policy: Policy,
    pub value: f64,
    pub body: String,
}

/// Result of one pass through the cooldown gate.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    /// Every recipient was notified and `last_alert_time` advanced.
    Sent { delivered: usize },
    /// An alert was warranted but the cooldown is still running.
    Suppressed {
        last_alert_time: DateTime<Utc>,
        remaining: Duration,
    },
    /// The evaluated value is within the allowed range.
    NoAlert,
}

impl AlertOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AlertOutcome::Sent { .. } => "sent",
            AlertOutcome::Suppressed { .. } => "suppressed",
            AlertOutcome::NoAlert => "no_alert",
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Hardware read failures. Never retried inside a cycle.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("sensor read failed on {device}: {reason}")]
    Read { device: String, reason: String },

    #[error("sensor returned an invalid distance: {0}")]
    InvalidReading(f64),

    #[error("no samples requested")]
    NoSamples,
}

/// Malformed or missing configuration. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("static range is inverted: upper ({upper}) must be >= lower ({lower})")]
    InvertedRange { lower: f64, upper: f64 },
}

/// Failures reading or writing the measurement log or alert state.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record in {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("unsupported alert state version {found} in {} (expected {expected})", .path.display())]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("another instance holds {} (pid {pid})", .path.display())]
    Locked { path: PathBuf, pid: String },
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Notification dispatch failures.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("send to {recipient} failed: {reason}")]
    Transport { recipient: String, reason: String },

    #[error("{} of {attempted} recipients failed: {}", .failures.len(), join_failures(.failures))]
    Incomplete {
        attempted: usize,
        failures: Vec<NotificationError>,
    },
}

fn join_failures(failures: &[NotificationError]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
