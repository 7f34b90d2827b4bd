//! Soil moisture sampling: calibrated probes feeding rolling windows.

use tracing::{debug, warn};

use crate::calibration::{percentage, CalibrationRange};
use crate::hardware::AnalogChannel;
use crate::window::ReadingWindow;

/// Plants monitored by the deployment; the snapshot schema has one field each.
pub const PLANT_COUNT: usize = 2;

/// Reported for every plant when the analog read fails for a cycle.
pub const MOISTURE_SENTINEL: f64 = 1.0;

/// Outcome of one moisture sample for one plant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoistureReading {
    /// Outlier-filtered rolling value, 0..=100.
    Measured(f64),
    /// The analog bus failed this cycle.
    Unavailable,
}

impl MoistureReading {
    /// Value as written to storage; unavailable readings use the sentinel.
    pub fn value(self) -> f64 {
        match self {
            Self::Measured(v) => v,
            Self::Unavailable => MOISTURE_SENTINEL,
        }
    }
}

/// One plant's soil probe: analog input, calibration and history.
pub struct PlantProbe {
    pub plant: u8,
    channel: Box<dyn AnalogChannel>,
    range: CalibrationRange,
    window: ReadingWindow,
}

impl PlantProbe {
    pub fn new(plant: u8, channel: Box<dyn AnalogChannel>, range: CalibrationRange) -> Self {
        Self {
            plant,
            channel,
            range,
            window: ReadingWindow::new(),
        }
    }
}

/// The set of plant probes sampled together each cycle.
///
/// Probes share one ADC, so the bank is all-or-nothing: if any channel fails
/// to read, no window is updated and every plant reports `Unavailable`.
pub struct MoistureBank {
    probes: [PlantProbe; PLANT_COUNT],
}

impl MoistureBank {
    pub fn new(probes: [PlantProbe; PLANT_COUNT]) -> Self {
        Self { probes }
    }

    pub fn sample(&mut self) -> [MoistureReading; PLANT_COUNT] {
        let mut raws = [0i32; PLANT_COUNT];
        for (slot, probe) in raws.iter_mut().zip(self.probes.iter_mut()) {
            match probe.channel.read_raw() {
                Ok(raw) => *slot = raw,
                Err(e) => {
                    warn!(
                        plant = probe.plant,
                        sentinel = MOISTURE_SENTINEL,
                        "moisture read failed: {e:#}"
                    );
                    return [MoistureReading::Unavailable; PLANT_COUNT];
                }
            }
        }

        let mut out = [MoistureReading::Unavailable; PLANT_COUNT];
        for ((reading, probe), raw) in out.iter_mut().zip(self.probes.iter_mut()).zip(raws) {
            let pct = percentage(raw, probe.range);
            probe.window.push(pct);
            let value = probe.window.aggregate();
            debug!(
                plant = probe.plant,
                raw,
                pct,
                window = probe.window.len(),
                value,
                "moisture sampled"
            );
            *reading = MoistureReading::Measured(value);
        }
        out
    }
}

#[cfg(test)]
impl MoistureReading {
    fn is_measured(self) -> bool {
        matches!(self, Self::Measured(_))
    }
}

#[cfg(test)]
impl MoistureBank {
    fn window(&self, index: usize) -> &ReadingWindow {
        &self.probes[index].window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use std::collections::VecDeque;

    /// Replays a scripted sequence of raw values; `None` is a bus error.
    struct Scripted(VecDeque<Option<i32>>);

    impl AnalogChannel for Scripted {
        fn read_raw(&mut self) -> Result<i32> {
            match self.0.pop_front().flatten() {
                Some(v) => Ok(v),
                None => Err(anyhow!("i2c nack")),
            }
        }
    }

    const RANGE: CalibrationRange = CalibrationRange::new(0, 1000);

    fn bank(p1: &[Option<i32>], p2: &[Option<i32>]) -> MoistureBank {
        MoistureBank::new([
            PlantProbe::new(1, Box::new(Scripted(p1.iter().copied().collect())), RANGE),
            PlantProbe::new(2, Box::new(Scripted(p2.iter().copied().collect())), RANGE),
        ])
    }

    #[test]
    fn sample_maps_and_aggregates() {
        let mut b = bank(&[Some(250)], &[Some(900)]);
        let r = b.sample();
        assert_eq!(r, [MoistureReading::Measured(75.0), MoistureReading::Measured(10.0)]);
    }

    #[test]
    fn window_accumulates_across_cycles() {
        let mut b = bank(&[Some(500), Some(400), Some(300)], &[Some(0); 3]);
        b.sample();
        b.sample();
        let r = b.sample();
        // (50 + 60 + 70) / 3
        assert_eq!(r[0], MoistureReading::Measured(60.0));
        assert_eq!(b.window(0).len(), 3);
    }

    #[test]
    fn any_failure_reports_sentinel_for_both() {
        let mut b = bank(&[Some(500)], &[None]);
        let r = b.sample();
        assert_eq!(r, [MoistureReading::Unavailable; PLANT_COUNT]);
        assert_eq!(r[0].value(), MOISTURE_SENTINEL);
        assert_eq!(r[1].value(), MOISTURE_SENTINEL);
    }

    #[test]
    fn failed_cycle_leaves_windows_untouched() {
        let mut b = bank(&[Some(500), Some(500)], &[None, Some(500)]);
        b.sample();
        assert!(b.window(0).is_empty());
        assert!(b.window(1).is_empty());

        let r = b.sample();
        assert!(r.iter().all(|m| m.is_measured()));
        assert_eq!(b.window(0).len(), 1);
    }

    #[test]
    fn sentinel_differs_from_boundaries() {
        assert_ne!(MoistureReading::Unavailable, MoistureReading::Measured(0.0));
        assert_ne!(MoistureReading::Unavailable, MoistureReading::Measured(100.0));
    }
}
