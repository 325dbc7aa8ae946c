/// levmon_service: ultrasonic liquid level monitoring with SMS alerts.
///
/// # Module structure
///
/// ```text
/// levmon_service
/// ├── model     — shared data types (Measurement, AlertState, AlertOutcome, errors)
/// ├── config    — configuration loader and validation (levmon.toml / legacy JSON)
/// ├── sensor    — DistanceSensor trait, IIO srf04 driver, scripted sensor
/// ├── pipeline  — averaged measurement acquisition and level derivation
/// ├── storage   — CSV measurement log, JSON alert state, instance lock
/// ├── notify    — Notifier trait, Twilio SMS, log-only and recording transports
/// ├── alert
/// │   ├── policy   — fill / drain / near / far / static threshold evaluation
/// │   └── cooldown — rate-limited dispatch and state advancement
/// ├── daemon    — sample cycle and monitoring loop
/// └── endpoint  — read-only HTTP status endpoint
/// ```

/// Public modules
pub mod alert;
pub mod config;
pub mod daemon;
pub mod endpoint;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod sensor;
pub mod storage;
