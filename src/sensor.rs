//! Sensor reading seam.
//!
//! Register-level access to the SHT4x lives in an external driver; this
//! module only defines the boundary the agent samples through, plus a
//! simulated implementation for bench and development use. Tests use
//! [`crate::testing::mocks::MockSensor`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// One temperature/humidity measurement, as produced by the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Temperature in degrees Celsius
    pub temperature_c: f64,
    /// Relative humidity in percent
    pub relative_humidity: f64,
}

/// Sensor failures. Always recovered locally: the caller logs and skips the
/// current cycle, then retries on the next natural tick.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor read failed: {0}")]
    ReadFailed(String),
    #[error("sensor not present: {0}")]
    NotPresent(String),
}

/// On-demand sampling boundary for the environmental sensor.
#[async_trait]
pub trait SensorReader: Send + Sync {
    async fn sample(&self) -> Result<Sample, SensorError>;
}

/// Deterministic stand-in sensor for running the agent without hardware.
///
/// Produces a slow sinusoid around a configured baseline so published values
/// visibly change between cycles.
#[derive(Debug)]
pub struct SimulatedSensor {
    base_temperature_c: f64,
    base_humidity: f64,
    reads: AtomicU64,
}

impl SimulatedSensor {
    pub fn new(base_temperature_c: f64, base_humidity: f64) -> Self {
        SimulatedSensor {
            base_temperature_c,
            base_humidity,
            reads: AtomicU64::new(0),
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new(21.5, 40.0)
    }
}

#[async_trait]
impl SensorReader for SimulatedSensor {
    async fn sample(&self) -> Result<Sample, SensorError> {
        let n = self.reads.fetch_add(1, Ordering::Relaxed) as f64;
        let phase = (n / 20.0).sin();
        Ok(Sample {
            temperature_c: self.base_temperature_c + phase * 0.75,
            relative_humidity: (self.base_humidity + phase * 2.0).clamp(0.0, 100.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_sensor_stays_near_baseline() {
        let sensor = SimulatedSensor::default();
        for _ in 0..100 {
            let sample = sensor.sample().await.unwrap();
            assert!((sample.temperature_c - 21.5).abs() <= 0.75);
            assert!((0.0..=100.0).contains(&sample.relative_humidity));
        }
    }

    #[tokio::test]
    async fn simulated_sensor_values_vary_between_reads() {
        let sensor = SimulatedSensor::default();
        let first = sensor.sample().await.unwrap();
        let mut changed = false;
        for _ in 0..10 {
            if sensor.sample().await.unwrap() != first {
                changed = true;
                break;
            }
        }
        assert!(changed, "consecutive reads should not all be identical");
    }
}
