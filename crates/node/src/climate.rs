//! Bounded-retry temperature/humidity reads.
//!
//! DHT11 sensors routinely fail checksums when read from user space, so a
//! read is retried a fixed number of times before falling back to a zeroed,
//! invalid reading. Bus errors count as invalid attempts; nothing propagates.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::calibration::round1;
use crate::hardware::ClimateSensor;

/// Total attempts per read, including the first.
pub const MAX_ATTEMPTS: u32 = 10;

/// Pause between consecutive attempts.
pub const RETRY_PAUSE: Duration = Duration::from_millis(100);

/// Per-cycle climate result. Not persisted beyond the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnvironmentReading {
    pub temperature: f64,
    pub humidity: f64,
    pub valid: bool,
}

impl EnvironmentReading {
    /// Sentinel returned once retries are exhausted. Numerically identical to
    /// a genuine 0.0°C / 0% reading; check `valid` to tell them apart.
    pub const UNAVAILABLE: Self = Self {
        temperature: 0.0,
        humidity: 0.0,
        valid: false,
    };
}

pub struct EnvironmentReader {
    label: &'static str,
    sensor: Box<dyn ClimateSensor>,
    max_attempts: u32,
    pause: Duration,
}

impl EnvironmentReader {
    pub fn new(label: &'static str, sensor: Box<dyn ClimateSensor>) -> Self {
        Self {
            label,
            sensor,
            max_attempts: MAX_ATTEMPTS,
            pause: RETRY_PAUSE,
        }
    }

    pub async fn read(&mut self) -> EnvironmentReading {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.sensor.read() {
                Ok(s) if s.valid => {
                    debug!(sensor = self.label, attempts, "climate read ok");
                    return EnvironmentReading {
                        temperature: round1(s.temperature),
                        humidity: round1(s.humidity),
                        valid: true,
                    };
                }
                Ok(_) => debug!(sensor = self.label, attempts, "climate read invalid"),
                Err(e) => debug!(sensor = self.label, attempts, "climate read error: {e:#}"),
            }

            if attempts >= self.max_attempts {
                warn!(
                    sensor = self.label,
                    attempts, "climate sensor gave no valid data, reporting 0.0/0.0"
                );
                return EnvironmentReading::UNAVAILABLE;
            }
            tokio::time::sleep(self.pause).await;
        }
    }
}
