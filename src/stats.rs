//! Small statistics helpers shared by the detectors.

use serde::{Deserialize, Serialize};

/// Confidence at exactly the threshold.
pub const THRESHOLD_CONFIDENCE: f64 = 0.6;

/// Running mean and sample standard deviation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldStats {
    pub mean: f64,
    pub std: f64,
    pub count: u64,
    #[serde(skip)]
    pub(crate) sum: f64,
    #[serde(skip)]
    pub(crate) sum_sq: f64,
}

impl FieldStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples(values: impl IntoIterator<Item = f64>) -> Self {
        let mut stats = Self::new();
        for v in values {
            stats.add_sample(v);
        }
        stats
    }

    pub fn add_sample(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.recompute();
    }

    fn recompute(&mut self) {
        if self.count == 0 {
            self.mean = 0.0;
            self.std = 0.0;
            return;
        }

        let n = self.count as f64;
        self.mean = self.sum / n;

        if self.count > 1 {
            let variance = (self.sum_sq - n * self.mean * self.mean) / (n - 1.0);
            self.std = variance.max(0.0).sqrt();
        } else {
            self.std = 0.0;
        }
    }

    pub fn is_valid(&self) -> bool {
        self.count >= 2 && self.std > 0.0
    }
}

/// Median of unsorted values.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, 0.5)
}

/// Median absolute deviation around `center`.
pub fn mad(values: &[f64], center: f64) -> Option<f64> {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Linear-interpolated percentile (`p` in [0, 1]) of sorted values.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 1.0);
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Standard logistic function.
pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Confidence for a statistic that reached `threshold`.
///
/// 0.6 at the threshold, rising linearly to 1.0 at twice the threshold.
/// A non-positive threshold saturates immediately.
pub fn margin_confidence(observed: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 1.0;
    }
    let margin = ((observed - threshold) / threshold).clamp(0.0, 1.0);
    THRESHOLD_CONFIDENCE + (1.0 - THRESHOLD_CONFIDENCE) * margin
}

/// Confidence for a value that fell below `threshold` (speed checks).
///
/// `1 - 0.4 * ratio`, so a ratio under 0.25 lands in the critical band.
pub fn shortfall_confidence(observed: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 0.0;
    }
    let ratio = (observed / threshold).clamp(0.0, 1.0);
    1.0 - 0.4 * ratio
}
