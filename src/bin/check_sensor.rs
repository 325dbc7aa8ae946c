#!/usr/bin/env rust
//! Sensor Check
//!
//! Continuously prints raw and averaged distances from the configured
//! ultrasonic sensor so it can be aimed and verified before deployment.
//! Nothing is logged to the results file and no alerts are evaluated.
//!
//! Usage:
//!   cargo run --bin check_sensor -- [--config PATH] [--count N] [--raw]
//!
//!   --raw    print every single read instead of averaged measurements

use levmon_service::config::{load_config, DEFAULT_CONFIG_PATH};
use levmon_service::pipeline::{average_distance_cm, Sampling};
use levmon_service::sensor::{DistanceSensor, IioDistanceSensor};
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut count: Option<usize> = None;
    let mut raw = false;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                config_path = PathBuf::from(args.get(i + 1).ok_or("--config requires a path")?);
                i += 2;
            }
            "--count" => {
                count = Some(args.get(i + 1).ok_or("--count requires a number")?.parse()?);
                i += 2;
            }
            "--raw" => {
                raw = true;
                i += 1;
            }
            other => return Err(format!("Unknown argument: {}", other).into()),
        }
    }

    let config = load_config(&config_path)?;
    let mut sensor = IioDistanceSensor::from_config(&config.sensor);
    let sampling = Sampling::from(&config.sensor);

    println!("📏 Sensor Check: {}", sensor.describe());
    println!("================================\n");
    if let Some(height) = config.sensor_height {
        println!("Sensor height above datum: {}cm\n", height);
    }

    let mut taken = 0;
    while count.is_none_or(|n| taken < n) {
        if raw {
            match sensor.read_raw_distance() {
                Ok(meters) => println!("Distance: {:.4}m", meters),
                Err(e) => eprintln!("✗ {}", e),
            }
            sleep(Duration::from_secs(1));
        } else {
            match average_distance_cm(&mut sensor, sampling) {
                Ok(cm) => match config.sensor_height {
                    Some(height) => println!("Distance: {:.2}cm  Level: {:.2}cm", cm, height - cm),
                    None => println!("Distance: {:.2}cm", cm),
                },
                Err(e) => eprintln!("✗ {}", e),
            }
            sleep(Duration::from_secs(3));
        }
        taken += 1;
    }

    Ok(())
}
