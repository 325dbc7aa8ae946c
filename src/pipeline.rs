/// Measurement pipeline: sample the sensor, average, convert, derive level.
///
/// One measurement is the arithmetic mean of `samples` raw reads taken
/// `delay` apart (defaults: 5 reads, 250 ms, so ~1.25 s of blocking). Any
/// failed or implausible read aborts the measurement; retrying is left to
/// the next scheduled cycle.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::SensorConfig;
use crate::model::{Measurement, SensorError};
use crate::sensor::DistanceSensor;

/// How many sub-readings to average and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub samples: usize,
    pub delay: Duration,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            samples: 5,
            delay: Duration::from_millis(250),
        }
    }
}

impl From<&SensorConfig> for Sampling {
    fn from(config: &SensorConfig) -> Self {
        Sampling {
            samples: config.samples,
            delay: Duration::from_millis(config.sample_delay_ms),
        }
    }
}

/// Reads `sampling.samples` distances and returns their mean in centimeters.
pub fn average_distance_cm(
    sensor: &mut dyn DistanceSensor,
    sampling: Sampling,
) -> Result<f64, SensorError> {
    if sampling.samples == 0 {
        return Err(SensorError::NoSamples);
    }

    let mut total_m = 0.0;
    for i in 0..sampling.samples {
        let reading = sensor.read_raw_distance()?;
        if !reading.is_finite() || reading < 0.0 {
            return Err(SensorError::InvalidReading(reading));
        }
        total_m += reading;

        if i + 1 < sampling.samples && !sampling.delay.is_zero() {
            std::thread::sleep(sampling.delay);
        }
    }

    Ok(total_m / sampling.samples as f64 * 100.0)
}

/// Acquires one measurement stamped with `now`.
///
/// When `sensor_height` is known the datum-relative level is derived as
/// `sensor_height - distance`. A datum above the sensor simply makes
/// `sensor_height` negative.
pub fn acquire_measurement(
    sensor: &mut dyn DistanceSensor,
    sampling: Sampling,
    sensor_height: Option<f64>,
    now: DateTime<Utc>,
) -> Result<Measurement, SensorError> {
    let raw_distance_cm = average_distance_cm(sensor, sampling)?;

    Ok(Measurement {
        time: now,
        raw_distance_cm,
        level_cm: sensor_height.map(|height| height - raw_distance_cm),
    })
}
