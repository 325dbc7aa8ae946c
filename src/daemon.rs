/// Core daemon implementation for the level monitoring service
///
/// One sample cycle runs to completion before the next begins:
/// 1. Acquire an averaged measurement from the sensor
/// 2. Append it to the measurement log
/// 3. Evaluate the alert policy
/// 4. Load alert state (created with a far-past sentinel on first run)
/// 5. Pass any alert through the cooldown gate and dispatch it
/// 6. Persist the advanced alert state (only after a successful send)
///
/// Measurements are recorded whatever the state file holds. A corrupt state
/// record degrades to the sentinel, which may repeat an alert but never
/// silences one.
///
/// Everything a cycle touches lives in `Daemon`; there is no global state.

use chrono::{DateTime, Utc};

use crate::alert::{evaluate, maybe_send_alert};
use crate::config::MonitorConfig;
use crate::model::{
    AlertOutcome, AlertState, ConfigError, Measurement, NotificationError, PersistenceError, SensorError,
};
use crate::notify::{self, Notifier};
use crate::pipeline::{acquire_measurement, Sampling};
use crate::sensor::{DistanceSensor, IioDistanceSensor};
use crate::storage::{JsonStateStore, MeasurementLog, StateStore};

// ---------------------------------------------------------------------------
// Errors and reports
// ---------------------------------------------------------------------------

/// Anything that can end a cycle early.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("notification error: {0}")]
    Notification(#[from] NotificationError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CycleError {
    /// Fatal errors stop the loop; everything else is logged and the next
    /// scheduled cycle tries again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CycleError::Config(_)
                | CycleError::Persistence(PersistenceError::Locked { .. })
                | CycleError::Persistence(PersistenceError::UnsupportedVersion { .. })
        )
    }
}

/// What one completed cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub measurement: Measurement,
    /// The value the policy was evaluated against.
    pub value: f64,
    pub outcome: AlertOutcome,
    /// False when the measurement could not be appended to the log.
    pub measurement_logged: bool,
    /// False when an alert was sent but the new state could not be written;
    /// the next cycle may then alert before the cooldown has elapsed.
    pub state_persisted: bool,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Explicit context for the sample cycle.
pub struct Daemon {
    config: MonitorConfig,
    sensor: Box<dyn DistanceSensor>,
    notifier: Box<dyn Notifier>,
    log: MeasurementLog,
    state_store: Box<dyn StateStore>,
}

impl Daemon {
    /// Assemble a daemon from already-built collaborators.
    pub fn new(
        config: MonitorConfig,
        sensor: Box<dyn DistanceSensor>,
        notifier: Box<dyn Notifier>,
        log: MeasurementLog,
        state_store: Box<dyn StateStore>,
    ) -> Self {
        Self {
            config,
            sensor,
            notifier,
            log,
            state_store,
        }
    }

    /// Build the production collaborators described by the configuration:
    /// IIO sensor, Twilio (or log-only) notifier, CSV log, JSON state.
    pub fn from_config(config: MonitorConfig, dry_run: bool) -> Result<Self, CycleError> {
        let sensor = IioDistanceSensor::from_config(&config.sensor);
        let notifier = notify::build_notifier(&config, dry_run)?;
        let log = MeasurementLog::open(&config.storage.results_path)?;
        let state_store = JsonStateStore::new(&config.storage.state_path);

        Ok(Self::new(
            config,
            Box::new(sensor),
            notifier,
            log,
            Box::new(state_store),
        ))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run one sample cycle stamped with `now`.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        let policy_name = self.config.policy.name.clone();

        let measurement = acquire_measurement(
            self.sensor.as_mut(),
            Sampling::from(&self.config.sensor),
            self.config.sensor_height,
            now,
        )
        .inspect_err(|e| {
            tracing::error!(
                time = %now.to_rfc3339(),
                policy = %policy_name,
                device = %self.sensor.describe(),
                error = %e,
                "measurement failed"
            );
        })?;

        let measurement_logged = match self.log.append(&measurement) {
            Ok(()) => true,
            Err(e) => {
                // Still evaluate: an alert matters more than the log row.
                tracing::error!(
                    time = %now.to_rfc3339(),
                    policy = %policy_name,
                    distance_cm = measurement.raw_distance_cm,
                    error = %e,
                    "failed to record measurement"
                );
                false
            }
        };

        let Some(value) = measurement.value_for(self.config.value_source()) else {
            return Err(ConfigError::MissingField("sensor_height").into());
        };
        tracing::info!(
            policy = %policy_name,
            distance_cm = measurement.raw_distance_cm,
            level_cm = ?measurement.level_cm,
            "measured"
        );

        let message = evaluate(&self.config.policy, value);
        let mut state = self.load_state(now)?;
        let outcome = maybe_send_alert(
            &mut state,
            message.as_ref(),
            self.config.cooldown(),
            now,
            self.notifier.as_ref(),
            &self.config.recipients,
        )
        .inspect_err(|e| {
            tracing::error!(
                time = %now.to_rfc3339(),
                policy = %policy_name,
                value,
                error = %e,
                "alert dispatch incomplete; state unchanged, will retry next cycle"
            );
        })?;

        let mut state_persisted = true;
        if let AlertOutcome::Sent { delivered } = outcome {
            tracing::warn!(policy = %policy_name, value, delivered, "alert sent");
            if let Err(e) = self.state_store.save(&state) {
                tracing::error!(
                    time = %now.to_rfc3339(),
                    policy = %policy_name,
                    value,
                    error = %e,
                    "DEGRADED: alert sent but state not persisted; cooldown may be shortened"
                );
                state_persisted = false;
            }
        }

        Ok(CycleReport {
            measurement,
            value,
            outcome,
            measurement_logged,
            state_persisted,
        })
    }

    /// Reads the alert state. A corrupt record is replaced by the sentinel
    /// so alerting keeps working; the next successful send rewrites it.
    fn load_state(&self, now: DateTime<Utc>) -> Result<AlertState, CycleError> {
        match self.state_store.load_or_init() {
            Ok(state) => Ok(state),
            Err(PersistenceError::Corrupt { path, reason }) => {
                tracing::error!(
                    time = %now.to_rfc3339(),
                    policy = %self.config.policy.name,
                    path = %path.display(),
                    %reason,
                    "DEGRADED: alert state unreadable; treating as no previous alert"
                );
                Ok(AlertState::sentinel())
            }
            Err(e) => {
                tracing::error!(
                    time = %now.to_rfc3339(),
                    policy = %self.config.policy.name,
                    error = %e,
                    "failed to load alert state"
                );
                Err(e.into())
            }
        }
    }

    /// Main daemon loop (runs indefinitely).
    pub fn run(&mut self) -> Result<(), CycleError> {
        self.run_loop(None)
    }

    /// Runs cycles back to back, sleeping out the rest of each sample
    /// interval. Stops after `max_cycles` when given, or on a fatal error.
    pub fn run_loop(&mut self, max_cycles: Option<usize>) -> Result<(), CycleError> {
        let interval = self.config.sample_interval();
        tracing::info!(
            policy = %self.config.policy.name,
            interval_secs = interval.as_secs_f64(),
            recipients = self.config.recipients.len(),
            "starting monitoring loop"
        );

        let mut completed = 0usize;
        loop {
            let start = Utc::now();

            match self.run_cycle(start) {
                Ok(report) => {
                    tracing::info!(
                        policy = %self.config.policy.name,
                        value = report.value,
                        outcome = report.outcome.label(),
                        "cycle complete"
                    );
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "fatal error, stopping");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cycle failed, continuing with next interval");
                }
            }

            completed += 1;
            if max_cycles.is_some_and(|max| completed >= max) {
                return Ok(());
            }

            // Sleep until next sample interval
            let elapsed = (Utc::now() - start).to_std().unwrap_or_default();
            if let Some(remaining) = interval.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
