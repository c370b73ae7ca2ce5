//! Flags, evidence and abstentions.
//!
//! Detectors emit [`Flag`]s and, when they cannot produce a meaningful
//! statistic, [`Abstention`]s. Flags are append-only from the engine's point
//! of view; only a consuming case-management system moves their status.

use crate::aggregator::severity_band;
use crate::detectors::person_fit::PersonFitEvidence;
use crate::detectors::revision::TransitionCounts;
use crate::detectors::sequential::PatternEvidence;
use crate::detectors::similarity::{ClusterEvidence, PairEvidence};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

/// Kind of a detection flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlagKind {
    RapidGuessing,
    PreKnowledge,
    Harvesting,
    FlipFlop,
    RapidRevision,
    /// Share of revised items above the configured percentage.
    AnswerChange,
    SequentialPattern,
    PersonFit,
    PairwiseSimilarity,
    TimeWindowAnomaly,
}

impl FlagKind {
    pub const ALL: [FlagKind; 10] = [
        FlagKind::RapidGuessing,
        FlagKind::PreKnowledge,
        FlagKind::Harvesting,
        FlagKind::FlipFlop,
        FlagKind::RapidRevision,
        FlagKind::AnswerChange,
        FlagKind::SequentialPattern,
        FlagKind::PersonFit,
        FlagKind::PairwiseSimilarity,
        FlagKind::TimeWindowAnomaly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlagKind::RapidGuessing => "rapid-guessing",
            FlagKind::PreKnowledge => "pre-knowledge",
            FlagKind::Harvesting => "harvesting",
            FlagKind::FlipFlop => "flip-flop",
            FlagKind::RapidRevision => "rapid-revision",
            FlagKind::AnswerChange => "answer-change",
            FlagKind::SequentialPattern => "sequential-pattern",
            FlagKind::PersonFit => "person-fit",
            FlagKind::PairwiseSimilarity => "pairwise-similarity",
            FlagKind::TimeWindowAnomaly => "time-window-anomaly",
        }
    }
}

/// Severity level, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Case lifecycle of a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlagStatus {
    Open,
    Investigating,
    Resolved,
    Dismissed,
}

impl FlagStatus {
    /// Whether a consumer may move a flag from `self` to `to`.
    pub fn can_transition_to(&self, to: FlagStatus) -> bool {
        use FlagStatus::*;
        matches!(
            (self, to),
            (Open, Investigating)
                | (Open, Resolved)
                | (Open, Dismissed)
                | (Investigating, Resolved)
                | (Investigating, Dismissed)
                | (Investigating, Open)
                | (Resolved, Open)
                | (Dismissed, Open)
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, FlagStatus::Resolved | FlagStatus::Dismissed)
    }
}

/// Detector-specific evidence payload. The aggregator only tells cluster
/// evidence apart from the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Evidence {
    /// Response faster than the rapid-guessing threshold.
    RapidGuess {
        item_id: String,
        response_time_ms: u64,
        threshold_ms: u64,
        ratio: f64,
    },
    /// Response time far from the item's peer baseline.
    OutlierScore {
        item_id: String,
        response_time_ms: u64,
        median_ms: f64,
        mad_ms: f64,
        outlier_score: f64,
        threshold: f64,
    },
    /// Burst of flagged responses inside one window.
    TimeWindow {
        flagged_in_window: usize,
        required: u32,
        window_ms: u64,
        window_start_ms: u64,
        window_end_ms: u64,
        flagged_total: usize,
    },
    /// Return to an abandoned choice.
    FlipFlop {
        item_id: String,
        choices: Vec<Option<String>>,
        returns: usize,
    },
    /// Revisions closer than the rapid-revision delta.
    RapidRevision {
        item_id: String,
        min_delta_ms: u64,
        threshold_ms: u64,
        rapid_changes: usize,
    },
    /// Too many revised items.
    AnswerChange {
        revised_items: usize,
        attempted_items: usize,
        percentage: f64,
        threshold: f64,
        transitions: TransitionCounts,
    },
    SequentialPattern(PatternEvidence),
    PersonFit(PersonFitEvidence),
    PairwiseSimilarity(PairEvidence),
    SimilarityCluster(ClusterEvidence),
}

/// Output of a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    /// Deterministic identifier (xxh64 of kind, subjects and anchor).
    pub id: String,
    pub kind: FlagKind,
    pub severity: Severity,
    /// In [0, 1].
    pub confidence: f64,
    /// One candidate, or two and more for similarity flags.
    pub subject_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Event time the flag is anchored to, used for deduplication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at_ms: Option<u64>,
    pub evidence: Evidence,
    pub status: FlagStatus,
}

impl Flag {
    /// Create an open flag. Severity is banded from the clamped confidence.
    pub fn new(
        kind: FlagKind,
        subject_ids: Vec<String>,
        confidence: f64,
        anchor: &str,
        evidence: Evidence,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            id: flag_id(kind, &subject_ids, anchor),
            kind,
            severity: severity_band(confidence),
            confidence,
            subject_ids,
            session_id: None,
            observed_at_ms: None,
            evidence,
            status: FlagStatus::Open,
        }
    }

    /// Flag for a single candidate.
    pub fn for_candidate(
        kind: FlagKind,
        candidate_id: &str,
        confidence: f64,
        anchor: &str,
        evidence: Evidence,
    ) -> Self {
        Self::new(kind, vec![candidate_id.to_string()], confidence, anchor, evidence)
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn observed_at(mut self, timestamp_ms: u64) -> Self {
        self.observed_at_ms = Some(timestamp_ms);
        self
    }

    pub fn involves(&self, candidate_id: &str) -> bool {
        self.subject_ids.iter().any(|s| s == candidate_id)
    }

    /// Apply a consumer-requested status change.
    pub fn transition(&mut self, to: FlagStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::StatusTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn flag_id(kind: FlagKind, subject_ids: &[String], anchor: &str) -> String {
    let mut key = String::from(kind.as_str());
    for subject in subject_ids {
        key.push('|');
        key.push_str(subject);
    }
    key.push('#');
    key.push_str(anchor);
    format!("{:016x}", xxh64(key.as_bytes(), 0))
}

/// Detector that produced a flag or abstention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    Timing,
    Revision,
    Sequential,
    PersonFit,
    Similarity,
}

/// Why a detector produced no signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum AbstentionReason {
    /// Not enough observations.
    InsufficientData { required: usize, available: usize },
    /// Zero spread or empty margins.
    DegenerateDistribution { detail: String },
    /// No peer timing baseline for the item.
    MissingBaseline,
    /// No ability estimate for the candidate.
    MissingAbility,
}

/// Explicit "not checked" record, so clean and unchecked never look alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Abstention {
    pub detector: DetectorKind,
    pub subject_ids: Vec<String>,
    /// Statistic that abstained, e.g. `time-window` or `g2`.
    pub statistic: String,
    #[serde(flatten)]
    pub reason: AbstentionReason,
}

impl Abstention {
    pub fn new(
        detector: DetectorKind,
        subject_ids: Vec<String>,
        statistic: impl Into<String>,
        reason: AbstentionReason,
    ) -> Self {
        Self {
            detector,
            subject_ids,
            statistic: statistic.into(),
            reason,
        }
    }

    pub fn for_candidate(
        detector: DetectorKind,
        candidate_id: &str,
        statistic: impl Into<String>,
        reason: AbstentionReason,
    ) -> Self {
        Self::new(detector, vec![candidate_id.to_string()], statistic, reason)
    }
}

/// Flags and abstentions from one detector invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectorOutput {
    pub flags: Vec<Flag>,
    pub abstentions: Vec<Abstention>,
}

impl DetectorOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&mut self, flag: Flag) {
        self.flags.push(flag);
    }

    pub fn abstain(&mut self, abstention: Abstention) {
        self.abstentions.push(abstention);
    }

    pub fn extend(&mut self, other: DetectorOutput) {
        self.flags.extend(other.flags);
        self.abstentions.extend(other.abstentions);
    }

    pub fn count(&self, kind: FlagKind) -> usize {
        self.flags.iter().filter(|f| f.kind == kind).count()
    }
}
