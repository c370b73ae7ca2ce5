//! Flag aggregation and risk scoring.
//!
//! The aggregator owns the one severity-banding rule in the crate, collapses
//! repeated flags into one and folds each candidate's flags into a single
//! risk score:
//!
//! ```text
//! risk = 1 - Π (1 - weight(kind) * confidence)
//! ```
//!
//! Cluster flags restate evidence already carried by their pair flags, so
//! they are listed on every member's record but stay out of the product.
//!
//! Deduplication only collapses re-observations: flags with the same id
//! (kind, subjects and anchor) that fall into the same `dedup_window_ms`
//! slot of the event clock. Distinct items, patterns or pairs are never
//! merged, and flags more than one window apart always survive.
//!
//! Aggregation is idempotent: running it again over its own output yields
//! the same flags and records.

use crate::config::AggregationConfig;
use crate::flag::{Evidence, Flag, FlagKind, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Lower bound of the critical band.
pub const CRITICAL_THRESHOLD: f64 = 0.9;
/// Lower bound of the high band.
pub const HIGH_THRESHOLD: f64 = 0.8;
/// Lower bound of the medium band.
pub const MEDIUM_THRESHOLD: f64 = 0.6;

/// Map a confidence or risk score to its severity band.
pub fn severity_band(score: f64) -> Severity {
    if score >= CRITICAL_THRESHOLD {
        Severity::Critical
    } else if score >= HIGH_THRESHOLD {
        Severity::High
    } else if score >= MEDIUM_THRESHOLD {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Overall risk of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    pub candidate_id: String,
    pub risk_score: f64,
    pub severity: Severity,
    pub flag_ids: Vec<String>,
    pub flag_counts: BTreeMap<FlagKind, usize>,
    pub max_confidence: f64,
}

/// Kept flags and ranked risk records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub flags: Vec<Flag>,
    pub risk_records: Vec<RiskRecord>,
    pub duplicates_removed: usize,
}

/// Risk scorer.
pub struct Aggregator<'a> {
    config: &'a AggregationConfig,
}

impl<'a> Aggregator<'a> {
    pub fn new(config: &'a AggregationConfig) -> Self {
        Self { config }
    }

    /// Deduplicate `flags` and score every candidate in `candidates` plus
    /// any other subject that appears on a flag.
    pub fn aggregate(&self, flags: Vec<Flag>, candidates: &[String]) -> Aggregation {
        let total = flags.len();
        let flags = self.deduplicate(flags);
        let duplicates_removed = total - flags.len();

        let mut records: BTreeMap<&str, RiskRecord> = candidates
            .iter()
            .map(|id| (id.as_str(), empty_record(id)))
            .collect();
        let mut survival: HashMap<&str, f64> = HashMap::new();

        for flag in &flags {
            let weighted = if matches!(flag.evidence, Evidence::SimilarityCluster(_)) {
                0.0
            } else {
                (self.config.weight(flag.kind) * flag.confidence).clamp(0.0, 1.0)
            };
            for subject in &flag.subject_ids {
                let record = records
                    .entry(subject.as_str())
                    .or_insert_with(|| empty_record(subject));
                record.flag_ids.push(flag.id.clone());
                *record.flag_counts.entry(flag.kind).or_insert(0) += 1;
                record.max_confidence = record.max_confidence.max(flag.confidence);
                *survival.entry(subject.as_str()).or_insert(1.0) *= 1.0 - weighted;
            }
        }

        let mut risk_records: Vec<RiskRecord> = records
            .into_iter()
            .map(|(id, mut record)| {
                let risk = 1.0 - survival.get(id).copied().unwrap_or(1.0);
                record.risk_score = risk.clamp(0.0, 1.0);
                record.severity = severity_band(record.risk_score);
                record
            })
            .collect();
        risk_records.sort_by(|a, b| {
            b.risk_score
                .total_cmp(&a.risk_score)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });

        log::debug!(
            "Aggregated {} flags ({} duplicates) into {} risk records",
            flags.len(),
            duplicates_removed,
            risk_records.len()
        );

        Aggregation {
            flags,
            risk_records,
            duplicates_removed,
        }
    }

    /// Collapse flags with the same id observed in the same window slot,
    /// keeping the most confident. Untimed flags collapse on id alone.
    /// Input order is preserved.
    pub fn deduplicate(&self, flags: Vec<Flag>) -> Vec<Flag> {
        let window = self.config.dedup_window_ms;
        let mut groups: BTreeMap<(&str, Option<u64>), Vec<usize>> = BTreeMap::new();
        for (i, flag) in flags.iter().enumerate() {
            let slot = flag
                .observed_at_ms
                .map(|t| if window == 0 { t } else { t / window });
            groups.entry((flag.id.as_str(), slot)).or_default().push(i);
        }

        let keep: HashSet<usize> = groups
            .values()
            .map(|indices| best_of(&flags, indices))
            .collect();

        flags
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, flag)| flag)
            .collect()
    }
}

fn empty_record(candidate_id: &str) -> RiskRecord {
    RiskRecord {
        candidate_id: candidate_id.to_string(),
        risk_score: 0.0,
        severity: Severity::Low,
        flag_ids: Vec::new(),
        flag_counts: BTreeMap::new(),
        max_confidence: 0.0,
    }
}

/// Highest confidence, then earliest observation, then input order.
fn best_of(flags: &[Flag], indices: &[usize]) -> usize {
    let mut best = indices[0];
    for &i in &indices[1..] {
        let (cand, cur) = (&flags[i], &flags[best]);
        if cand.confidence > cur.confidence
            || (cand.confidence == cur.confidence && cand.observed_at_ms < cur.observed_at_ms)
        {
            best = i;
        }
    }
    best
}
