//! One poll cycle: sample every sensor, build the snapshot, hand it to storage.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::climate::EnvironmentReader;
use crate::hardware::DigitalInput;
use crate::moisture::MoistureBank;
use crate::solar::SolarClock;

/// Fixed-schema record written once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub temperature_inside: f64,
    pub humidity_inside: f64,
    pub temperature_outside: f64,
    pub humidity_outside: f64,
    pub light: u8,
    pub moisture_plant_1: f64,
    pub moisture_plant_2: f64,
    pub sun_up: u8,
}

/// Write side of the time-series store. Delivery is best-effort; the poll
/// loop only logs failures.
pub trait TelemetrySink {
    fn write(
        &self,
        at: DateTime<Utc>,
        snapshot: TelemetrySnapshot,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Owns every sensor handle and per-plant history for the poll loop.
pub struct TelemetryAggregator {
    moisture: MoistureBank,
    light: Box<dyn DigitalInput>,
    inside: EnvironmentReader,
    outside: EnvironmentReader,
    solar: SolarClock,
}

impl TelemetryAggregator {
    pub fn new(
        moisture: MoistureBank,
        light: Box<dyn DigitalInput>,
        inside: EnvironmentReader,
        outside: EnvironmentReader,
        solar: SolarClock,
    ) -> Self {
        Self {
            moisture,
            light,
            inside,
            outside,
            solar,
        }
    }

    /// The light module's comparator pulls its output LOW when lit.
    fn read_light(&mut self) -> u8 {
        match self.light.is_high() {
            Ok(high) => u8::from(!high),
            Err(e) => {
                warn!("light read failed, reporting dark: {e:#}");
                0
            }
        }
    }

    /// Run one cycle's reads in order and assemble the snapshot.
    pub async fn poll(&mut self, now: DateTime<Utc>) -> TelemetrySnapshot {
        let [plant_1, plant_2] = self.moisture.sample();
        let light = self.read_light();
        let inside = self.inside.read().await;
        let outside = self.outside.read().await;
        let sun_up = self.solar.is_sun_up(now);

        TelemetrySnapshot {
            temperature_inside: inside.temperature,
            humidity_inside: inside.humidity,
            temperature_outside: outside.temperature,
            humidity_outside: outside.humidity,
            light,
            moisture_plant_1: plant_1.value(),
            moisture_plant_2: plant_2.value(),
            sun_up: u8::from(sun_up),
        }
    }

    /// Poll, write, sleep; forever. A failed write never ends the loop.
    pub async fn run<S: TelemetrySink>(mut self, sink: S, interval: Duration) {
        info!(interval_sec = interval.as_secs(), "telemetry loop started");
        loop {
            let now = Utc::now();
            let snapshot = self.poll(now).await;
            info!(?snapshot, "telemetry cycle");

            if let Err(e) = sink.write(now, snapshot).await {
                error!("telemetry write failed: {e:#}");
            }

            tokio::time::sleep(interval).await;
        }
    }
}
