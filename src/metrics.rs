//! Run metrics for detection reports
//!
//! Counts of what a detection run produced: flags by kind and severity,
//! abstentions by detector, and the size of the work it did.

use crate::flag::{Abstention, DetectorKind, Flag, FlagKind, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Statistics for one detection run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Sessions processed
    pub candidates: usize,
    /// Response events read
    pub events: usize,
    /// Candidate pairs scored
    pub pairs_evaluated: usize,
    /// Flags kept after deduplication
    pub flags_total: usize,
    /// Flags dropped as duplicates
    pub duplicates_removed: usize,
    /// Kept flags per kind
    pub flags_by_kind: BTreeMap<FlagKind, usize>,
    /// Kept flags per severity
    pub flags_by_severity: BTreeMap<Severity, usize>,
    /// Abstentions per detector
    pub abstentions_by_detector: BTreeMap<DetectorKind, usize>,
}

impl RunMetrics {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a kept flag
    pub fn record_flag(&mut self, flag: &Flag) {
        self.flags_total += 1;
        *self.flags_by_kind.entry(flag.kind).or_insert(0) += 1;
        *self.flags_by_severity.entry(flag.severity).or_insert(0) += 1;
    }

    /// Record an abstention
    pub fn record_abstention(&mut self, abstention: &Abstention) {
        *self
            .abstentions_by_detector
            .entry(abstention.detector)
            .or_insert(0) += 1;
    }

    /// Total abstentions
    pub fn abstentions_total(&self) -> usize {
        self.abstentions_by_detector.values().sum()
    }

    /// Flags of one kind
    pub fn count(&self, kind: FlagKind) -> usize {
        self.flags_by_kind.get(&kind).copied().unwrap_or(0)
    }

    /// Flags at or above a severity
    pub fn at_least(&self, severity: Severity) -> usize {
        self.flags_by_severity
            .range(severity..)
            .map(|(_, count)| count)
            .sum()
    }

    /// Kept flags per candidate (0.0 for an empty run)
    pub fn flags_per_candidate(&self) -> f64 {
        if self.candidates == 0 {
            return 0.0;
        }
        self.flags_total as f64 / self.candidates as f64
    }
}
