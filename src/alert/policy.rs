//! Threshold checking for the configured alert policy.
//!
//! Comparisons are on signed values with full precision, so datum-relative
//! levels below zero work as long as a static range keeps `upper >= lower`
//! (enforced when the configuration is loaded). The value is rounded to two
//! decimals only when rendered into the message text.

use crate::model::AlertMessage;

/// The fixed set of alert shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Policy {
    /// Alert when the level rises above `threshold`.
    Fill { threshold: f64 },
    /// Alert when the level drops below `threshold`.
    Drain { threshold: f64 },
    /// Alert when the surface comes closer to the sensor than `threshold`.
    Near { threshold: f64 },
    /// Alert when the surface is farther from the sensor than `threshold`.
    Far { threshold: f64 },
    /// Alert when the value falls strictly outside `[lower, upper]`.
    Static { lower: f64, upper: f64 },
}

/// A named policy for one monitored entity.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertPolicy {
    pub name: String,
    pub policy: Policy,
}

/// Evaluates `value` against the policy and renders an alert if warranted.
///
/// Returns `None` when the value is within the allowed range (this includes
/// NaN, which never satisfies any comparison).
pub fn evaluate(policy: &AlertPolicy, value: f64) -> Option<AlertMessage> {
    let name = &policy.name;
    let shown = fmt_value(value);

    let body = match policy.policy {
        Policy::Fill { threshold } if value > threshold => format!(
            "Warning: your {} level is {}cm, which is above your allowed level of {}cm.",
            name, shown, threshold
        ),
        Policy::Drain { threshold } if value < threshold => format!(
            "Warning: your {} level is {}cm, which is below your allowed level of {}cm.",
            name, shown, threshold
        ),
        Policy::Near { threshold } if value < threshold => format!(
            "Warning: your {} distance is {}cm, which is closer than your allowed distance of {}cm.",
            name, shown, threshold
        ),
        Policy::Far { threshold } if value > threshold => format!(
            "Warning: your {} distance is {}cm, which is farther than your allowed distance of {}cm.",
            name, shown, threshold
        ),
        Policy::Static { lower, upper } if value > upper || value < lower => format!(
            "Warning: your {} level is {}cm, which is out of your allowed range of {} to {}cm.",
            name, shown, lower, upper
        ),
        _ => return None,
    };

    Some(AlertMessage {
        policy_name: name.clone(),
        policy: policy.policy,
        value,
        body,
    })
}

/// Rounds to two decimals for display; `50.0` prints as `50`.
fn fmt_value(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    // avoid "-0"
    if rounded == 0.0 {
        return "0".to_string();
    }
    format!("{}", rounded)
}
