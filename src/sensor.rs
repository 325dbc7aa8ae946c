/// Ultrasonic distance sensor access.
///
/// The HC-SR04 is driven by the Linux `srf04` IIO driver (device tree overlay
/// with trigger and echo GPIOs). Each read of `in_distance_raw` triggers one
/// ping and returns the distance in millimeters; `scale_to_meters` converts
/// it to meters, the unit of `DistanceSensor::read_raw_distance`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::SensorConfig;
use crate::model::SensorError;

/// A source of single raw distance readings, in meters.
pub trait DistanceSensor {
    fn read_raw_distance(&mut self) -> Result<f64, SensorError>;

    /// Human-readable device name for logs.
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// IIO (srf04) sensor
// ---------------------------------------------------------------------------

/// HC-SR04 exposed through the kernel IIO subsystem.
pub struct IioDistanceSensor {
    raw_path: PathBuf,
    scale_to_meters: f64,
}

impl IioDistanceSensor {
    pub fn new(device: &Path, scale_to_meters: f64) -> Self {
        Self {
            raw_path: device.join("in_distance_raw"),
            scale_to_meters,
        }
    }

    pub fn from_config(config: &SensorConfig) -> Self {
        Self::new(&config.device, config.scale_to_meters)
    }
}

impl DistanceSensor for IioDistanceSensor {
    fn read_raw_distance(&mut self) -> Result<f64, SensorError> {
        let read_error = |reason: String| SensorError::Read {
            device: self.raw_path.display().to_string(),
            reason,
        };

        // The driver returns ETIMEDOUT / EIO when no echo arrives.
        let text = fs::read_to_string(&self.raw_path).map_err(|e| read_error(e.to_string()))?;
        let raw: f64 = text
            .trim()
            .parse()
            .map_err(|_| read_error(format!("unparseable value {:?}", text.trim())))?;

        Ok(raw * self.scale_to_meters)
    }

    fn describe(&self) -> String {
        self.raw_path.display().to_string()
    }
}

// ---------------------------------------------------------------------------
// Scripted sensor
// ---------------------------------------------------------------------------

/// Replays a fixed list of readings (meters), cycling when exhausted. Used by
/// tests and for exercising a configuration without hardware.
pub struct ScriptedSensor {
    readings: Vec<Result<f64, String>>,
    next: usize,
}

impl ScriptedSensor {
    pub fn new(readings_m: Vec<f64>) -> Self {
        Self {
            readings: readings_m.into_iter().map(Ok).collect(),
            next: 0,
        }
    }

    /// A sensor whose every read fails with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            readings: vec![Err(reason.to_string())],
            next: 0,
        }
    }

    /// A sensor that yields `readings_m` and then fails on every later read.
    pub fn then_failing(readings_m: Vec<f64>, reason: &str) -> Self {
        let mut readings: Vec<Result<f64, String>> = readings_m.into_iter().map(Ok).collect();
        readings.push(Err(reason.to_string()));
        Self { readings, next: 0 }
    }
}

impl DistanceSensor for ScriptedSensor {
    fn read_raw_distance(&mut self) -> Result<f64, SensorError> {
        let Some(reading) = self.readings.get(self.next) else {
            return Err(SensorError::Read {
                device: self.describe(),
                reason: "no scripted readings".to_string(),
            });
        };
        if self.next + 1 < self.readings.len() || reading.is_ok() {
            self.next = (self.next + 1) % self.readings.len();
        }
        reading.clone().map_err(|reason| SensorError::Read {
            device: "scripted".to_string(),
            reason,
        })
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
