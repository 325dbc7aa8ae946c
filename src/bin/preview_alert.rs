#!/usr/bin/env rust
//! Alert Preview
//!
//! Evaluates the configured policy against hypothetical values and prints
//! the message that would be sent. Useful for checking thresholds and sign
//! conventions (negative levels, inverted datum) without touching the sensor,
//! the state file, or the SMS account.
//!
//! Usage:
//!   cargo run --bin preview_alert -- [--config PATH] VALUE [VALUE ...]
//!
//! VALUE is a level (cm above datum) for fill/drain/static policies with a
//! sensor height, otherwise a distance from the sensor (cm).

use levmon_service::alert::evaluate;
use levmon_service::config::{load_config, DEFAULT_CONFIG_PATH};
use levmon_service::model::ValueSource;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut values = Vec::new();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config" {
            config_path = PathBuf::from(args.get(i + 1).ok_or("--config requires a path")?);
            i += 2;
        } else {
            let value: f64 = args[i]
                .parse()
                .map_err(|_| format!("not a number: {}", args[i]))?;
            values.push(value);
            i += 1;
        }
    }

    if values.is_empty() {
        return Err("usage: preview_alert [--config PATH] VALUE [VALUE ...]".into());
    }

    let config = load_config(&config_path)?;
    let unit = match config.value_source() {
        ValueSource::Level => "level",
        ValueSource::Distance => "distance",
    };

    println!("🔔 Alert Preview: {} ({:?})", config.policy.name, config.policy.policy);
    println!("================================\n");

    for value in values {
        match evaluate(&config.policy, value) {
            Some(alert) => println!("{} {}cm → ALERT\n   {}", unit, value, alert.body),
            None => println!("{} {}cm → ok", unit, value),
        }
    }

    Ok(())
}
