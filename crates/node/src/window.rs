//! Rolling per-plant moisture history with IQR outlier rejection.

use std::collections::VecDeque;

use crate::calibration::round1;

/// Number of most recent percentages that contribute to the rolling value.
pub const WINDOW_CAPACITY: usize = 8;

/// Below this many samples the quartiles are meaningless and filtering is
/// skipped.
const MIN_SAMPLES_FOR_IQR: usize = 4;

/// Tukey fence multiplier.
const IQR_FENCE: f64 = 1.5;

/// Fixed-capacity FIFO of moisture percentages for one plant channel.
///
/// Only the poll loop writes to a window, so it carries no lock.
#[derive(Debug, Clone, Default)]
pub struct ReadingWindow {
    values: VecDeque<f64>,
}

impl ReadingWindow {
    pub fn new() -> Self {
        Self {
            values: VecDeque::with_capacity(WINDOW_CAPACITY + 1),
        }
    }

    /// Append `value`, evicting the oldest entry once capacity is exceeded.
    pub fn push(&mut self, value: f64) {
        self.values.push_back(value);
        if self.values.len() > WINDOW_CAPACITY {
            self.values.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Current contents, oldest first.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Outlier-filtered mean of the window, rounded to one decimal and
    /// clamped to 0..=100. An empty result averages to 0.
    pub fn aggregate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let samples: Vec<f64> = self.values().collect();
        let kept = reject_outliers(&samples);
        if kept.is_empty() {
            return 0.0;
        }
        let mean = kept.iter().sum::<f64>() / kept.len() as f64;
        round1(mean).clamp(0.0, 100.0)
    }
}

/// Keep the samples inside `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]`, preserving order.
pub fn reject_outliers(samples: &[f64]) -> Vec<f64> {
    if samples.len() < MIN_SAMPLES_FOR_IQR {
        return samples.to_vec();
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let q1 = percentile(&sorted, 25.0);
    let q3 = percentile(&sorted, 75.0);
    let iqr = q3 - q1;
    let lower = q1 - IQR_FENCE * iqr;
    let upper = q3 + IQR_FENCE * iqr;

    samples
        .iter()
        .copied()
        .filter(|v| (lower..=upper).contains(v))
        .collect()
}

/// Linearly interpolated percentile over an ascending, non-empty slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
