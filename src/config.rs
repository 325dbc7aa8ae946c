/// Monitor configuration loader - parses levmon.toml (or a legacy .json file)
///
/// Separates the alert policy, sensor geometry and storage locations from
/// code. The raw document is deserialized as-is, then validated into a
/// `MonitorConfig` whose policy type cannot express an inverted range or a
/// level policy without a sensor height.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::alert::{AlertPolicy, Policy};
use crate::model::{ConfigError, ValueSource};

/// Default path used by `main` when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "levmon.toml";

/// Environment variable holding the Twilio auth token when it is not in the file.
pub const TWILIO_TOKEN_ENV: &str = "TWILIO_AUTH_TOKEN";

// ---------------------------------------------------------------------------
// Raw document
// ---------------------------------------------------------------------------

/// Configuration document as written on disk.
///
/// Field aliases accept the key names used by older `config.json` files
/// (`type`, `warning_level`, `warning_frequency`, `test_frequency`,
/// `phone_numbers`). Those files also keep the Twilio account at the top
/// level (`twilio_account_sid`, `twilio_number`, `twilio_auth_token`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    pub name: Option<String>,

    #[serde(alias = "type")]
    pub policy_type: Option<PolicyType>,

    #[serde(alias = "warning_level")]
    pub threshold: Option<ThresholdConfig>,

    #[serde(alias = "sensor_offset")]
    pub sensor_height: Option<f64>,

    #[serde(alias = "warning_frequency")]
    pub warning_frequency_minutes: Option<f64>,

    #[serde(alias = "test_frequency")]
    pub sample_interval_minutes: Option<f64>,

    #[serde(default, alias = "phone_numbers")]
    pub recipients: Vec<String>,

    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    pub twilio: Option<TwilioConfig>,

    pub twilio_account_sid: Option<String>,
    pub twilio_number: Option<String>,
    pub twilio_auth_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyType {
    Fill,
    Drain,
    Static,
    Near,
    Far,
}

/// Either a single bound or a `{ lower, upper }` range.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ThresholdConfig {
    Single(f64),
    Range { lower: f64, upper: f64 },
}

/// Ultrasonic sensor acquisition settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorConfig {
    /// IIO device directory exposing `in_distance_raw`.
    #[serde(default = "default_device")]
    pub device: PathBuf,
    /// Sub-readings averaged into one measurement.
    #[serde(default = "default_samples")]
    pub samples: usize,
    /// Delay between sub-readings.
    #[serde(default = "default_sample_delay_ms")]
    pub sample_delay_ms: u64,
    /// Multiplier turning `in_distance_raw` into meters (srf04 reports mm).
    #[serde(default = "default_scale_to_meters")]
    pub scale_to_meters: f64,
}

fn default_device() -> PathBuf {
    PathBuf::from("/sys/bus/iio/devices/iio:device0")
}

fn default_samples() -> usize {
    5
}

fn default_sample_delay_ms() -> u64 {
    250
}

fn default_scale_to_meters() -> f64 {
    0.001
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            samples: default_samples(),
            sample_delay_ms: default_sample_delay_ms(),
            scale_to_meters: default_scale_to_meters(),
        }
    }
}

/// Where measurements and alert state live.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_results_path")]
    pub results_path: PathBuf,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

fn default_results_path() -> PathBuf {
    PathBuf::from("results.csv")
}

fn default_state_path() -> PathBuf {
    PathBuf::from("state.json")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            results_path: default_results_path(),
            state_path: default_state_path(),
        }
    }
}

/// Twilio SMS account settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TwilioConfig {
    #[serde(alias = "twilio_account_sid")]
    pub account_sid: String,
    #[serde(alias = "twilio_number")]
    pub from_number: String,
    #[serde(default, alias = "twilio_auth_token")]
    pub auth_token: Option<String>,
    #[serde(default = "default_twilio_api_base")]
    pub api_base: String,
}

fn default_twilio_api_base() -> String {
    "https://api.twilio.com".to_string()
}

// ---------------------------------------------------------------------------
// Validated configuration
// ---------------------------------------------------------------------------

/// Fully validated configuration consumed by the daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub policy: AlertPolicy,
    pub sensor_height: Option<f64>,
    pub warning_frequency_minutes: f64,
    pub sample_interval_minutes: f64,
    pub recipients: Vec<String>,
    pub sensor: SensorConfig,
    pub storage: StorageConfig,
    pub twilio: Option<TwilioConfig>,
}

impl MonitorConfig {
    /// Minimum interval between two dispatched alerts.
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.warning_frequency_minutes * 60_000.0).round() as i64)
    }

    /// Polling period between cycle starts.
    pub fn sample_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.sample_interval_minutes * 60.0)
    }

    /// Quantity the policy compares against.
    pub fn value_source(&self) -> ValueSource {
        match self.policy.policy {
            Policy::Near { .. } | Policy::Far { .. } => ValueSource::Distance,
            Policy::Fill { .. } | Policy::Drain { .. } => ValueSource::Level,
            Policy::Static { .. } if self.sensor_height.is_some() => ValueSource::Level,
            Policy::Static { .. } => ValueSource::Distance,
        }
    }
}

/// Parses a configuration document. `.json` files are read with serde_json,
/// everything else as TOML.
pub fn parse_config(contents: &str, path: &Path) -> Result<RawConfig, ConfigError> {
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let parsed = if is_json {
        serde_json::from_str(contents).map_err(|e| e.to_string())
    } else {
        toml::from_str(contents).map_err(|e| e.to_string())
    };

    parsed.map_err(|reason| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

/// Loads and validates the configuration file.
///
/// Relative storage paths are resolved against the directory containing the
/// configuration file, so the service behaves the same under cron as from a
/// shell.
pub fn load_config(path: &Path) -> Result<MonitorConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let raw = parse_config(&contents, path)?;
    let mut config = validate(raw)?;

    if let Some(base) = path.parent() {
        config.storage.results_path = resolve(base, &config.storage.results_path);
        config.storage.state_path = resolve(base, &config.storage.state_path);
    }

    Ok(config)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || base.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Converts a raw document into a `MonitorConfig`, rejecting anything the
/// alert core could misinterpret.
pub fn validate(raw: RawConfig) -> Result<MonitorConfig, ConfigError> {
    let name = raw.name.ok_or(ConfigError::MissingField("name"))?;
    if name.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field: "name",
            reason: "must not be empty".to_string(),
        });
    }

    let policy_type = raw.policy_type.ok_or(ConfigError::MissingField("policy_type"))?;
    let threshold = raw.threshold.ok_or(ConfigError::MissingField("threshold"))?;
    let policy = build_policy(policy_type, threshold)?;

    if let Some(height) = raw.sensor_height {
        finite("sensor_height", height)?;
    } else if matches!(policy_type, PolicyType::Fill | PolicyType::Drain) {
        return Err(ConfigError::MissingField("sensor_height"));
    }

    let warning_frequency_minutes = raw
        .warning_frequency_minutes
        .ok_or(ConfigError::MissingField("warning_frequency_minutes"))?;
    finite("warning_frequency_minutes", warning_frequency_minutes)?;
    if warning_frequency_minutes < 0.0 {
        return Err(ConfigError::Invalid {
            field: "warning_frequency_minutes",
            reason: format!("must be >= 0, got {}", warning_frequency_minutes),
        });
    }

    let sample_interval_minutes = raw
        .sample_interval_minutes
        .ok_or(ConfigError::MissingField("sample_interval_minutes"))?;
    finite("sample_interval_minutes", sample_interval_minutes)?;
    if sample_interval_minutes <= 0.0 {
        return Err(ConfigError::Invalid {
            field: "sample_interval_minutes",
            reason: format!("must be > 0, got {}", sample_interval_minutes),
        });
    }

    if raw.sensor.samples == 0 {
        return Err(ConfigError::Invalid {
            field: "sensor.samples",
            reason: "must be at least 1".to_string(),
        });
    }
    if !(raw.sensor.scale_to_meters.is_finite() && raw.sensor.scale_to_meters > 0.0) {
        return Err(ConfigError::Invalid {
            field: "sensor.scale_to_meters",
            reason: format!("must be a positive number, got {}", raw.sensor.scale_to_meters),
        });
    }

    if let Some(blank) = raw.recipients.iter().find(|r| r.trim().is_empty()) {
        return Err(ConfigError::Invalid {
            field: "recipients",
            reason: format!("blank recipient {:?}", blank),
        });
    }
    if raw.recipients.is_empty() {
        tracing::warn!(policy = %name, "no recipients configured; alerts will only be logged");
    }

    let twilio = match raw.twilio {
        Some(twilio) => Some(twilio),
        None => legacy_twilio(raw.twilio_account_sid, raw.twilio_number, raw.twilio_auth_token)?,
    };

    Ok(MonitorConfig {
        policy: AlertPolicy { name, policy },
        sensor_height: raw.sensor_height,
        warning_frequency_minutes,
        sample_interval_minutes,
        recipients: raw.recipients,
        sensor: raw.sensor,
        storage: raw.storage,
        twilio,
    })
}

/// Builds the Twilio section from top-level legacy keys. All absent means no
/// Twilio account; a partial set is an error rather than a silent log-only run.
fn legacy_twilio(
    account_sid: Option<String>,
    from_number: Option<String>,
    auth_token: Option<String>,
) -> Result<Option<TwilioConfig>, ConfigError> {
    match (account_sid, from_number) {
        (Some(account_sid), Some(from_number)) => Ok(Some(TwilioConfig {
            account_sid,
            from_number,
            auth_token,
            api_base: default_twilio_api_base(),
        })),
        (None, None) if auth_token.is_none() => Ok(None),
        (None, _) => Err(ConfigError::MissingField("twilio_account_sid")),
        (Some(_), None) => Err(ConfigError::MissingField("twilio_number")),
    }
}

fn build_policy(policy_type: PolicyType, threshold: ThresholdConfig) -> Result<Policy, ConfigError> {
    use ThresholdConfig::{Range, Single};

    match (policy_type, threshold) {
        (PolicyType::Static, Range { lower, upper }) => {
            let lower = finite("threshold.lower", lower)?;
            let upper = finite("threshold.upper", upper)?;
            if upper < lower {
                return Err(ConfigError::InvertedRange { lower, upper });
            }
            Ok(Policy::Static { lower, upper })
        }
        (PolicyType::Static, Single(_)) => Err(ConfigError::Invalid {
            field: "threshold",
            reason: "static policy needs { lower, upper }".to_string(),
        }),
        (PolicyType::Fill, Single(t)) => Ok(Policy::Fill { threshold: finite("threshold", t)? }),
        (PolicyType::Drain, Single(t)) => Ok(Policy::Drain { threshold: finite("threshold", t)? }),
        (PolicyType::Near, Single(t)) => Ok(Policy::Near { threshold: finite("threshold", t)? }),
        (PolicyType::Far, Single(t)) => Ok(Policy::Far { threshold: finite("threshold", t)? }),
        (_, Range { .. }) => Err(ConfigError::Invalid {
            field: "threshold",
            reason: "fill, drain, near and far policies need a single number".to_string(),
        }),
    }
}

fn finite(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be a finite number, got {}", value),
        })
    }
}
