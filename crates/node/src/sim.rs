//! Simulated greenhouse hardware for local development.
//!
//! - Soil probes: mean-reverting random walk in ADC units with per-read
//!   noise, occasional spikes and rare bus errors
//! - DHT11: slow temperature/humidity drift, a share of reads fail checksum
//! - Light: follows the hour of day, with the module's active-low output

use std::fmt;

use anyhow::{bail, Result};
use chrono::{Timelike, Utc};

use crate::calibration::CalibrationRange;
use crate::hardware::{AnalogChannel, ClimateSample, ClimateSensor, DigitalInput};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Irwin-Hall: sum of 12 uniform [0,1) values minus 6 approximates N(0,1).
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Selected via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Low noise, rare failures.
    Stable,
    /// Frequent spikes, frequent DHT11 checksum failures, some ADC errors.
    /// Exercises outlier rejection and the retry/sentinel paths.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "flaky" => Self::Flaky,
            _ => Self::Stable,
        }
    }

    fn spike_prob(self) -> f64 {
        match self {
            Self::Stable => 0.02,
            Self::Flaky => 0.15,
        }
    }

    fn bus_error_prob(self) -> f64 {
        match self {
            Self::Stable => 0.0,
            Self::Flaky => 0.05,
        }
    }

    fn checksum_fail_prob(self) -> f64 {
        match self {
            Self::Stable => 0.2,
            Self::Flaky => 0.7,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Soil probe
// ---------------------------------------------------------------------------

pub struct SimSoilProbe {
    scenario: Scenario,
    /// Current "true" soil state in ADC units.
    base: f64,
    center: f64,
    lo: f64,
    hi: f64,
    walk_sigma: f64,
    noise_sigma: f64,
}

impl SimSoilProbe {
    /// Start mid-way through the calibrated span.
    pub fn new(range: CalibrationRange, scenario: Scenario) -> Self {
        let lo = f64::from(range.min.min(range.max));
        let hi = f64::from(range.min.max(range.max));
        let center = (lo + hi) / 2.0;
        let span = (hi - lo).max(1.0);
        Self {
            scenario,
            base: center,
            center,
            lo,
            hi,
            walk_sigma: span * 0.005,
            noise_sigma: span * 0.01,
        }
    }
}

impl AnalogChannel for SimSoilProbe {
    fn read_raw(&mut self) -> Result<i32> {
        if fastrand::f64() < self.scenario.bus_error_prob() {
            bail!("simulated i2c error");
        }

        self.base += gaussian(0.0, self.walk_sigma) + 0.05 * (self.center - self.base);
        self.base = self.base.clamp(self.lo, self.hi);

        let mut raw = gaussian(self.base, self.noise_sigma);
        if fastrand::f64() < self.scenario.spike_prob() {
            raw += gaussian(0.0, (self.hi - self.lo) * 0.5);
        }
        Ok(raw.round().clamp(0.0, 32767.0) as i32)
    }
}

// ---------------------------------------------------------------------------
// DHT11
// ---------------------------------------------------------------------------

pub struct SimClimate {
    scenario: Scenario,
    temperature: f64,
    humidity: f64,
}

impl SimClimate {
    pub fn new(temperature: f64, humidity: f64, scenario: Scenario) -> Self {
        Self {
            scenario,
            temperature,
            humidity,
        }
    }
}

impl ClimateSensor for SimClimate {
    fn read(&mut self) -> Result<ClimateSample> {
        self.temperature = (self.temperature + gaussian(0.0, 0.05)).clamp(-10.0, 50.0);
        self.humidity = (self.humidity + gaussian(0.0, 0.2)).clamp(5.0, 95.0);

        if fastrand::f64() < self.scenario.checksum_fail_prob() {
            return Ok(ClimateSample::invalid());
        }
        // DHT11 resolution is whole degrees / percent.
        Ok(ClimateSample {
            valid: true,
            temperature: self.temperature.round(),
            humidity: self.humidity.round(),
        })
    }
}

// ---------------------------------------------------------------------------
// Light
// ---------------------------------------------------------------------------

/// LOW between 07:00 and 21:00 UTC, HIGH otherwise.
pub struct SimLight;

impl DigitalInput for SimLight {
    fn is_high(&mut self) -> Result<bool> {
        let hour = Utc::now().hour();
        Ok(!(7..21).contains(&hour))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANGE: CalibrationRange = CalibrationRange::new(8602, 17590);

    #[test]
    fn scenario_parsing() {
        assert_eq!(Scenario::from_str_lossy("FLAKY"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("stable"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy("whatever"), Scenario::Stable);
        assert_eq!(Scenario::Flaky.to_string(), "flaky");
    }

    #[test]
    fn stable_probe_stays_in_adc_range() {
        let mut p = SimSoilProbe::new(RANGE, Scenario::Stable);
        for _ in 0..500 {
            let raw = p.read_raw().unwrap();
            assert!((0..=32767).contains(&raw));
        }
    }

    #[test]
    fn stable_probe_base_stays_within_calibration() {
        let mut p = SimSoilProbe::new(RANGE, Scenario::Stable);
        for _ in 0..500 {
            let _ = p.read_raw();
            assert!(p.base >= p.lo && p.base <= p.hi);
        }
    }

    #[test]
    fn degenerate_range_does_not_panic() {
        let mut p = SimSoilProbe::new(CalibrationRange::new(9000, 9000), Scenario::Flaky);
        for _ in 0..50 {
            let _ = p.read_raw();
        }
    }

    #[test]
    fn climate_valid_reads_are_whole_numbers() {
        let mut c = SimClimate::new(21.0, 55.0, Scenario::Stable);
        let mut valid = 0;
        for _ in 0..200 {
            let s = c.read().unwrap();
            if s.valid {
                valid += 1;
                assert_eq!(s.temperature.fract(), 0.0);
                assert_eq!(s.humidity.fract(), 0.0);
            }
        }
        assert!(valid > 0);
    }
}
