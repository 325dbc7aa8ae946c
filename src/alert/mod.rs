/// Alert decision core.
///
/// Submodules:
/// - `policy`   — pure threshold evaluation (fill, drain, near, far, static)
/// - `cooldown` — rate-limited dispatch gate around the notifier
///
/// Control flows one way: a measured value goes through `evaluate`, and the
/// resulting message (if any) goes through `maybe_send_alert`.

pub mod cooldown;
pub mod policy;

pub use cooldown::maybe_send_alert;
pub use policy::{evaluate, AlertPolicy, Policy};
