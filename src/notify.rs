/// Notification transports for alert dispatch
///
/// One `send` call per recipient, no batching. Each call returns the
/// transport's delivery id or a per-recipient `NotificationError::Transport`.
///
/// Transports:
/// - `TwilioNotifier`    — SMS through the Twilio REST API (blocking reqwest)
/// - `LogNotifier`       — logs the alert instead of sending it (dry runs)
/// - `RecordingNotifier` — in-memory transport for tests

use serde::Deserialize;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{MonitorConfig, TwilioConfig, TWILIO_TOKEN_ENV};
use crate::model::{ConfigError, NotificationError};

/// Sends one alert body to one recipient.
pub trait Notifier {
    fn send(&self, recipient: &str, body: &str) -> Result<String, NotificationError>;
}

/// Picks the transport for this run: Twilio when configured, otherwise (or
/// with `dry_run`) the log transport.
pub fn build_notifier(config: &MonitorConfig, dry_run: bool) -> Result<Box<dyn Notifier>, ConfigError> {
    match (&config.twilio, dry_run) {
        (Some(twilio), false) => Ok(Box::new(TwilioNotifier::from_config(twilio)?)),
        (None, false) => {
            tracing::warn!("no [twilio] section configured; alerts will only be logged");
            Ok(Box::new(LogNotifier))
        }
        (_, true) => Ok(Box::new(LogNotifier)),
    }
}

// ---------------------------------------------------------------------------
// Twilio
// ---------------------------------------------------------------------------

/// Successful Messages resource (only the fields we use).
#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: String,
}

/// Twilio error body, e.g. `{"code": 21211, "message": "Invalid 'To' Phone Number"}`.
#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

/// SMS transport backed by the Twilio Messages API.
pub struct TwilioNotifier {
    client: reqwest::blocking::Client,
    messages_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioNotifier {
    /// Builds the transport; the auth token comes from the config file or,
    /// failing that, from `TWILIO_AUTH_TOKEN` (a `.env` file is honored).
    pub fn from_config(config: &TwilioConfig) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let auth_token = match &config.auth_token {
            Some(token) => token.clone(),
            None => env::var(TWILIO_TOKEN_ENV).map_err(|_| ConfigError::MissingField("twilio.auth_token"))?,
        };

        if config.account_sid.trim().is_empty() {
            return Err(ConfigError::MissingField("twilio.account_sid"));
        }
        if config.from_number.trim().is_empty() {
            return Err(ConfigError::MissingField("twilio.from_number"));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "twilio",
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            messages_url: messages_url(&config.api_base, &config.account_sid),
            account_sid: config.account_sid.clone(),
            auth_token,
            from_number: config.from_number.clone(),
        })
    }
}

/// `{api_base}/2010-04-01/Accounts/{sid}/Messages.json`
fn messages_url(api_base: &str, account_sid: &str) -> String {
    format!(
        "{}/2010-04-01/Accounts/{}/Messages.json",
        api_base.trim_end_matches('/'),
        urlencoding::encode(account_sid)
    )
}

impl Notifier for TwilioNotifier {
    fn send(&self, recipient: &str, body: &str) -> Result<String, NotificationError> {
        let transport = |reason: String| NotificationError::Transport {
            recipient: recipient.to_string(),
            reason,
        };

        let response = self
            .client
            .post(&self.messages_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", recipient), ("From", self.from_number.as_str()), ("Body", body)])
            .send()
            .map_err(|e| transport(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| transport(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(transport(describe_twilio_error(status.as_u16(), &text)));
        }

        let message: TwilioMessage = serde_json::from_str(&text)
            .map_err(|e| transport(format!("unexpected response: {}", e)))?;

        Ok(message.sid)
    }
}

fn describe_twilio_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<TwilioErrorBody>(body) {
        Ok(TwilioErrorBody {
            code: Some(code),
            message: Some(message),
        }) => format!("HTTP {} (Twilio {}): {}", status, code, message),
        Ok(TwilioErrorBody {
            message: Some(message),
            ..
        }) => format!("HTTP {}: {}", status, message),
        _ => format!("HTTP {}", status),
    }
}

// ---------------------------------------------------------------------------
// Log-only transport
// ---------------------------------------------------------------------------

/// Logs alerts instead of sending them.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, recipient: &str, body: &str) -> Result<String, NotificationError> {
        tracing::warn!(%recipient, "alert (not sent): {}", body);
        Ok(format!("log-{}", chrono::Utc::now().timestamp_millis()))
    }
}

// ---------------------------------------------------------------------------
// Recording transport
// ---------------------------------------------------------------------------

/// Records every successful send; recipients listed in `failing` get a
/// transport error instead. Clones share the same record.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    failing: Vec<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(recipients: &[&str]) -> Self {
        Self {
            sent: Arc::default(),
            failing: recipients.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// `(recipient, body)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, recipient: &str, body: &str) -> Result<String, NotificationError> {
        if self.failing.iter().any(|r| r == recipient) {
            return Err(NotificationError::Transport {
                recipient: recipient.to_string(),
                reason: "simulated failure".to_string(),
            });
        }
        let mut sent = self.sent.lock().map_err(|_| NotificationError::Transport {
            recipient: recipient.to_string(),
            reason: "recorder poisoned".to_string(),
        })?;
        sent.push((recipient.to_string(), body.to_string()));
        Ok(format!("rec-{}", sent.len()))
    }
}
