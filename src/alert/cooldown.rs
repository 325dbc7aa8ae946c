//! Rate-limited alert dispatch.
//!
//! An alert is suppressed while `now - last_alert_time < cooldown`. Once
//! eligible, every recipient is attempted, and `last_alert_time` only moves
//! when all of them succeeded. A partial failure leaves the state untouched
//! so the next cycle re-sends to everyone (at-least-once, possibly duplicate).

use chrono::{DateTime, Duration, Utc};

use crate::model::{AlertMessage, AlertOutcome, AlertState, NotificationError};
use crate::notify::Notifier;

/// Passes `message` through the cooldown gate and dispatches it.
///
/// On `Ok(AlertOutcome::Sent)` the in-memory `state` has been advanced to
/// `now`; persisting it is the caller's last step of the cycle. On any error
/// the state is unchanged.
pub fn maybe_send_alert(
    state: &mut AlertState,
    message: Option<&AlertMessage>,
    cooldown: Duration,
    now: DateTime<Utc>,
    notifier: &dyn Notifier,
    recipients: &[String],
) -> Result<AlertOutcome, NotificationError> {
    let Some(message) = message else {
        return Ok(AlertOutcome::NoAlert);
    };

    let elapsed = now - state.last_alert_time;
    if elapsed < cooldown {
        tracing::info!(
            policy = %message.policy_name,
            value = message.value,
            last_alert = %state.last_alert_time.to_rfc3339(),
            "alert suppressed, cooldown active"
        );
        return Ok(AlertOutcome::Suppressed {
            last_alert_time: state.last_alert_time,
            remaining: cooldown - elapsed,
        });
    }

    let mut failures = Vec::new();
    for recipient in recipients {
        match notifier.send(recipient, &message.body) {
            Ok(delivery_id) => {
                tracing::info!(%recipient, %delivery_id, "alert delivered");
            }
            Err(e) => {
                tracing::error!(%recipient, error = %e, "alert delivery failed");
                failures.push(e);
            }
        }
    }

    if !failures.is_empty() {
        return Err(NotificationError::Incomplete {
            attempted: recipients.len(),
            failures,
        });
    }

    state.last_alert_time = now;
    Ok(AlertOutcome::Sent {
        delivered: recipients.len(),
    })
}
