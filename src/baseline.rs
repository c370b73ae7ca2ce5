//! Peer response-time baselines.
//!
//! The outlier-score model compares each response time with the robust
//! centre (median) and spread (median absolute deviation) of the same item's
//! response times across a reference population. Baselines are normally
//! supplied by an external historical store; [`TimingBaselines::from_sessions`]
//! derives them from a cohort when no history exists.

use crate::response::CandidateSession;
use crate::stats::{mad, median};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Robust response-time summary for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTimingBaseline {
    pub median_ms: f64,
    pub mad_ms: f64,
    pub sample_count: usize,
}

impl ItemTimingBaseline {
    pub fn new(median_ms: f64, mad_ms: f64, sample_count: usize) -> Self {
        Self {
            median_ms,
            mad_ms,
            sample_count,
        }
    }

    /// Summarize raw response times. `None` when there are no samples.
    pub fn from_samples(samples: &[u64]) -> Option<Self> {
        let values: Vec<f64> = samples.iter().map(|&v| v as f64).collect();
        let median_ms = median(&values)?;
        let mad_ms = mad(&values, median_ms)?;
        Some(Self::new(median_ms, mad_ms, values.len()))
    }

    /// `(observed - median) / MAD`; `None` when the spread is zero.
    pub fn outlier_score(&self, observed_ms: u64) -> Option<f64> {
        if !(self.mad_ms > 0.0) || !self.median_ms.is_finite() {
            return None;
        }
        Some((observed_ms as f64 - self.median_ms) / self.mad_ms)
    }
}

/// Baselines keyed by item id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingBaselines {
    items: BTreeMap<String, ItemTimingBaseline>,
}

impl TimingBaselines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item_id: &str, baseline: ItemTimingBaseline) {
        self.items.insert(item_id.to_string(), baseline);
    }

    pub fn get(&self, item_id: &str) -> Option<&ItemTimingBaseline> {
        self.items.get(item_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Build from per-item sample lists.
    pub fn from_samples(samples: &HashMap<String, Vec<u64>>) -> Self {
        let mut baselines = Self::new();
        for (item_id, times) in samples {
            if let Some(baseline) = ItemTimingBaseline::from_samples(times) {
                baselines.insert(item_id, baseline);
            }
        }
        baselines
    }

    /// Derive baselines from the first-attempt times of a cohort.
    pub fn from_sessions(sessions: &[CandidateSession]) -> Self {
        let mut samples: HashMap<String, Vec<u64>> = HashMap::new();
        for session in sessions {
            for event in session.first_attempts() {
                samples
                    .entry(event.item_id.clone())
                    .or_default()
                    .push(event.response_time_ms);
            }
        }
        Self::from_samples(&samples)
    }
}
