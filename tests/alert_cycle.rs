/// Integration tests for the sample cycle
///
/// These tests drive full cycles (state load → acquire → record → evaluate
/// → cooldown → dispatch → state write) with a scripted sensor, a recording
/// notifier and a temporary storage directory. No hardware or network is
/// needed.
///
/// Run with: cargo test --test alert_cycle

use chrono::{DateTime, Duration, TimeZone, Utc};
use levmon_service::alert::{AlertPolicy, Policy};
use levmon_service::config::{MonitorConfig, SensorConfig, StorageConfig};
use levmon_service::daemon::{CycleError, Daemon};
use levmon_service::model::{ALERT_STATE_VERSION, AlertOutcome, AlertState, PersistenceError};
use levmon_service::notify::RecordingNotifier;
use levmon_service::sensor::ScriptedSensor;
use levmon_service::storage::{JsonStateStore, MeasurementLog, StateStore};
use std::path::Path;
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const SENSOR_HEIGHT: f64 = 60.96;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn monitor_config(dir: &Path, policy: Policy, sensor_height: Option<f64>) -> MonitorConfig {
    MonitorConfig {
        policy: AlertPolicy {
            name: "basement".to_string(),
            policy,
        },
        sensor_height,
        warning_frequency_minutes: 15.0,
        sample_interval_minutes: 1.0,
        recipients: vec!["+15555550100".to_string(), "+15555550101".to_string()],
        sensor: SensorConfig {
            samples: 5,
            sample_delay_ms: 0,
            ..SensorConfig::default()
        },
        storage: StorageConfig {
            results_path: dir.join("results.csv"),
            state_path: dir.join("state.json"),
        },
        twilio: None,
    }
}

/// Distance (m) the scripted sensor must report for a given level (cm).
fn distance_for_level(level_cm: f64) -> f64 {
    (SENSOR_HEIGHT - level_cm) / 100.0
}

fn build(
    config: MonitorConfig,
    readings_m: Vec<f64>,
    notifier: &RecordingNotifier,
    store: Box<dyn StateStore>,
) -> Daemon {
    let log = MeasurementLog::open(&config.storage.results_path).unwrap();
    Daemon::new(
        config,
        Box::new(ScriptedSensor::new(readings_m)),
        Box::new(notifier.clone()),
        log,
        store,
    )
}

fn json_store(dir: &Path) -> Box<dyn StateStore> {
    Box::new(JsonStateStore::new(dir.join("state.json")))
}

fn seed_state(dir: &Path, last_alert_time: DateTime<Utc>) {
    JsonStateStore::new(dir.join("state.json"))
        .save(&AlertState {
            version: ALERT_STATE_VERSION,
            last_alert_time,
        })
        .unwrap();
}

fn stored_state(dir: &Path) -> AlertState {
    JsonStateStore::new(dir.join("state.json"))
        .load()
        .unwrap()
        .expect("state file should exist")
}

/// State store whose writes always fail, to exercise the degraded path.
struct ReadOnlyStore {
    state: AlertState,
    save_attempts: Arc<Mutex<usize>>,
}

impl StateStore for ReadOnlyStore {
    fn load_or_init(&self) -> Result<AlertState, PersistenceError> {
        Ok(self.state.clone())
    }

    fn save(&self, _state: &AlertState) -> Result<(), PersistenceError> {
        *self.save_attempts.lock().unwrap() += 1;
        Err(PersistenceError::Io {
            path: "state.json".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only filesystem"),
        })
    }
}

// ---------------------------------------------------------------------------
// 1. Policy scenarios through a full cycle
// ---------------------------------------------------------------------------

#[test]
fn test_fill_above_threshold_sends_alert() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let config = monitor_config(dir.path(), Policy::Fill { threshold: 45.72 }, Some(SENSOR_HEIGHT));
    let mut daemon = build(config, vec![distance_for_level(50.0)], &notifier, json_store(dir.path()));

    let report = daemon.run_cycle(t0()).unwrap();

    assert_eq!(report.outcome, AlertOutcome::Sent { delivered: 2 });
    assert!((report.value - 50.0).abs() < 1e-9);
    let sent = notifier.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].1.contains("50cm"), "message: {}", sent[0].1);
    assert!(sent[0].1.contains("45.72cm"), "message: {}", sent[0].1);
    assert_eq!(stored_state(dir.path()).last_alert_time, t0());
}

#[test]
fn test_drain_above_threshold_stays_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let config = monitor_config(dir.path(), Policy::Drain { threshold: 45.72 }, Some(SENSOR_HEIGHT));
    let mut daemon = build(config, vec![distance_for_level(50.0)], &notifier, json_store(dir.path()));

    let report = daemon.run_cycle(t0()).unwrap();

    assert_eq!(report.outcome, AlertOutcome::NoAlert);
    assert!(notifier.sent().is_empty());
    assert_eq!(stored_state(dir.path()), AlertState::sentinel());
}

#[test]
fn test_static_range_violation_mentions_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    // No sensor height: the static range applies to the raw distance
    let config = monitor_config(dir.path(), Policy::Static { lower: 10.0, upper: 25.0 }, None);
    let mut daemon = build(config, vec![0.50], &notifier, json_store(dir.path()));

    let report = daemon.run_cycle(t0()).unwrap();

    assert!(matches!(report.outcome, AlertOutcome::Sent { .. }));
    assert_eq!(report.measurement.level_cm, None);
    assert!(notifier.sent()[0].1.contains("range of 10 to 25cm"));
}

#[test]
fn test_static_negative_levels_below_lower_bound_alert() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    // Datum above the sensor: sensor_height is negative, so are all levels
    let config = monitor_config(dir.path(), Policy::Static { lower: -5.0, upper: -3.0 }, Some(-2.0));
    // 8 cm from the sensor → level -10
    let mut daemon = build(config, vec![0.08], &notifier, json_store(dir.path()));

    let report = daemon.run_cycle(t0()).unwrap();

    assert!((report.value + 10.0).abs() < 1e-9);
    assert!(matches!(report.outcome, AlertOutcome::Sent { .. }));
    assert!(notifier.sent()[0].1.contains("range of -5 to -3cm"));
}

#[test]
fn test_near_policy_evaluates_raw_distance() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let config = monitor_config(dir.path(), Policy::Near { threshold: 10.0 }, Some(SENSOR_HEIGHT));
    let mut daemon = build(config, vec![0.08], &notifier, json_store(dir.path()));

    let report = daemon.run_cycle(t0()).unwrap();

    assert!((report.value - 8.0).abs() < 1e-9);
    assert!(report.measurement.level_cm.is_some());
    assert!(notifier.sent()[0].1.contains("closer than your allowed distance of 10cm"));
}

// ---------------------------------------------------------------------------
// 2. Cooldown
// ---------------------------------------------------------------------------

#[test]
fn test_recent_alert_suppresses_and_leaves_state() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let last = t0() - Duration::minutes(5);
    seed_state(dir.path(), last);
    let config = monitor_config(dir.path(), Policy::Fill { threshold: 45.72 }, Some(SENSOR_HEIGHT));
    let mut daemon = build(config, vec![distance_for_level(50.0)], &notifier, json_store(dir.path()));

    let report = daemon.run_cycle(t0()).unwrap();

    assert!(matches!(report.outcome, AlertOutcome::Suppressed { last_alert_time, .. } if last_alert_time == last));
    assert!(notifier.sent().is_empty());
    assert_eq!(stored_state(dir.path()).last_alert_time, last);
    // the measurement is still recorded
    assert_eq!(MeasurementLog::open(dir.path().join("results.csv")).unwrap().recent(10).unwrap().len(), 1);
}

#[test]
fn test_expired_cooldown_sends_and_updates_state() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    seed_state(dir.path(), t0() - Duration::minutes(20));
    let config = monitor_config(dir.path(), Policy::Fill { threshold: 45.72 }, Some(SENSOR_HEIGHT));
    let mut daemon = build(config, vec![distance_for_level(50.0)], &notifier, json_store(dir.path()));

    let report = daemon.run_cycle(t0()).unwrap();

    assert_eq!(report.outcome, AlertOutcome::Sent { delivered: 2 });
    assert!(report.state_persisted);
    assert_eq!(stored_state(dir.path()).last_alert_time, t0());
}

#[test]
fn test_first_cycle_on_fresh_install_can_alert() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let mut config = monitor_config(dir.path(), Policy::Fill { threshold: 45.72 }, Some(SENSOR_HEIGHT));
    // a year-long cooldown still lets the first alert through
    config.warning_frequency_minutes = 60.0 * 24.0 * 365.0;
    let mut daemon = build(config, vec![distance_for_level(55.0)], &notifier, json_store(dir.path()));

    assert!(!dir.path().join("state.json").exists());
    let report = daemon.run_cycle(t0()).unwrap();

    assert!(matches!(report.outcome, AlertOutcome::Sent { .. }));
    assert!(dir.path().join("state.json").exists());
}

#[test]
fn test_sustained_violation_alerts_once_per_cooldown() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let config = monitor_config(dir.path(), Policy::Fill { threshold: 45.72 }, Some(SENSOR_HEIGHT));
    let mut daemon = build(config, vec![distance_for_level(50.0)], &notifier, json_store(dir.path()));

    // one cycle per minute for 31 minutes
    let outcomes: Vec<AlertOutcome> = (0..=30)
        .map(|minute| daemon.run_cycle(t0() + Duration::minutes(minute)).unwrap().outcome)
        .collect();

    let sent_at: Vec<usize> = outcomes
        .iter()
        .enumerate()
        .filter(|(_, o)| matches!(o, AlertOutcome::Sent { .. }))
        .map(|(minute, _)| minute)
        .collect();
    assert_eq!(sent_at, vec![0, 15, 30]);
    assert_eq!(notifier.sent().len(), 6);

    let log = MeasurementLog::open(dir.path().join("results.csv")).unwrap();
    assert_eq!(log.recent(100).unwrap().len(), 31);
}

// ---------------------------------------------------------------------------
// 3. Failure handling
// ---------------------------------------------------------------------------

#[test]
fn test_partial_send_failure_keeps_state_and_retries_everyone() {
    let dir = tempfile::tempdir().unwrap();
    let flaky = RecordingNotifier::failing_for(&["+15555550100"]);
    let config = monitor_config(dir.path(), Policy::Fill { threshold: 45.72 }, Some(SENSOR_HEIGHT));
    let mut daemon = build(config.clone(), vec![distance_for_level(50.0)], &flaky, json_store(dir.path()));

    let result = daemon.run_cycle(t0());
    assert!(matches!(result, Err(CycleError::Notification(_))));
    assert!(!result.as_ref().unwrap_err().is_fatal());
    assert_eq!(stored_state(dir.path()), AlertState::sentinel());
    // the healthy recipient was still attempted
    assert_eq!(flaky.sent().len(), 1);

    // transport recovers: next cycle sends to both again
    let healthy = RecordingNotifier::new();
    let mut daemon = build(config, vec![distance_for_level(50.0)], &healthy, json_store(dir.path()));
    let report = daemon.run_cycle(t0() + Duration::minutes(1)).unwrap();
    assert_eq!(report.outcome, AlertOutcome::Sent { delivered: 2 });
    assert_eq!(healthy.sent().len(), 2);
}

#[test]
fn test_state_write_failure_is_degraded_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let attempts = Arc::new(Mutex::new(0));
    let store = ReadOnlyStore {
        state: AlertState::sentinel(),
        save_attempts: Arc::clone(&attempts),
    };
    let config = monitor_config(dir.path(), Policy::Fill { threshold: 45.72 }, Some(SENSOR_HEIGHT));
    let mut daemon = build(config, vec![distance_for_level(50.0)], &notifier, Box::new(store));

    let report = daemon.run_cycle(t0()).unwrap();

    assert!(matches!(report.outcome, AlertOutcome::Sent { .. }));
    assert!(!report.state_persisted);
    assert_eq!(*attempts.lock().unwrap(), 1);
}

#[test]
fn test_no_state_write_without_send() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let attempts = Arc::new(Mutex::new(0));
    let store = ReadOnlyStore {
        state: AlertState::sentinel(),
        save_attempts: Arc::clone(&attempts),
    };
    let config = monitor_config(dir.path(), Policy::Fill { threshold: 45.72 }, Some(SENSOR_HEIGHT));
    let mut daemon = build(config, vec![distance_for_level(30.0)], &notifier, Box::new(store));

    let report = daemon.run_cycle(t0()).unwrap();

    assert_eq!(report.outcome, AlertOutcome::NoAlert);
    assert!(report.state_persisted);
    assert_eq!(*attempts.lock().unwrap(), 0);
}

#[test]
fn test_garbage_state_file_keeps_recording_and_alerting() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("state.json"), "garbage").unwrap();
    let notifier = RecordingNotifier::new();
    let config = monitor_config(dir.path(), Policy::Fill { threshold: 45.72 }, Some(SENSOR_HEIGHT));
    let mut daemon = build(config, vec![distance_for_level(50.0)], &notifier, json_store(dir.path()));

    let outcomes: Vec<AlertOutcome> = (0..3)
        .map(|minute| daemon.run_cycle(t0() + Duration::minutes(minute)).unwrap().outcome)
        .collect();

    // first cycle alerts as if fresh; the rewritten state then enforces the cooldown
    assert_eq!(outcomes[0], AlertOutcome::Sent { delivered: 2 });
    assert!(matches!(outcomes[1], AlertOutcome::Suppressed { .. }));
    assert!(matches!(outcomes[2], AlertOutcome::Suppressed { .. }));
    assert_eq!(notifier.sent().len(), 2);
    assert_eq!(stored_state(dir.path()).last_alert_time, t0());

    let log = MeasurementLog::open(dir.path().join("results.csv")).unwrap();
    assert_eq!(log.recent(10).unwrap().len(), 3);
}

#[test]
fn test_garbage_state_file_without_violation_still_records() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("state.json"), "garbage").unwrap();
    let notifier = RecordingNotifier::new();
    let config = monitor_config(dir.path(), Policy::Fill { threshold: 45.72 }, Some(SENSOR_HEIGHT));
    let mut daemon = build(config, vec![distance_for_level(30.0)], &notifier, json_store(dir.path()));

    for minute in 0..3 {
        let report = daemon.run_cycle(t0() + Duration::minutes(minute)).unwrap();
        assert_eq!(report.outcome, AlertOutcome::NoAlert);
    }

    let log = MeasurementLog::open(dir.path().join("results.csv")).unwrap();
    assert_eq!(log.recent(10).unwrap().len(), 3);
    assert!(notifier.sent().is_empty());
}

#[test]
fn test_unsupported_state_version_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("state.json"),
        r#"{"version": 2, "last_alert_time": "2024-05-01T12:00:00Z"}"#,
    )
    .unwrap();
    let notifier = RecordingNotifier::new();
    let config = monitor_config(dir.path(), Policy::Fill { threshold: 45.72 }, Some(SENSOR_HEIGHT));
    let mut daemon = build(config, vec![distance_for_level(50.0)], &notifier, json_store(dir.path()));

    let err = daemon.run_cycle(t0()).unwrap_err();
    assert!(err.is_fatal());
    assert!(daemon.run_loop(Some(5)).is_err());
    assert!(notifier.sent().is_empty());
}
