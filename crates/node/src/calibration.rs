//! Raw ADC value to moisture percentage mapping.
//!
//! Capacitive probes read *lower* the wetter the soil is, so `max` (bone dry)
//! maps to 0% and `min` (submerged) maps to 100%.

use serde::Deserialize;

/// Factory calibration bounds for one analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CalibrationRange {
    pub min: i32,
    pub max: i32,
}

impl CalibrationRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn is_degenerate(&self) -> bool {
        self.min == self.max
    }
}

/// Map `raw` onto 0..=100 using `range`, rounded to one decimal.
///
/// Total over its inputs: a zero-width range yields 0 and out-of-range raw
/// values are clamped.
pub fn percentage(raw: i32, range: CalibrationRange) -> f64 {
    if range.is_degenerate() {
        return 0.0;
    }
    let span = f64::from(range.max) - f64::from(range.min);
    let pct = (f64::from(range.max) - f64::from(raw)) / span * 100.0;
    round1(pct).clamp(0.0, 100.0)
}

/// Round to one decimal place, halves to even.
pub fn round1(v: f64) -> f64 {
    (v * 10.0).round_ties_even() / 10.0
}
