//! Detection report.
//!
//! The serializable result of one detection run, handed to dashboards,
//! alerting pipelines and case-management systems.

use crate::aggregator::RiskRecord;
use crate::detectors::revision::RevisionSummary;
use crate::detectors::similarity::SimilaritySummary;
use crate::detectors::timing::ResponseTimeSummary;
use crate::error::{EngineError, Result};
use crate::flag::{Abstention, Flag, FlagKind};
use crate::metrics::RunMetrics;
use serde::{Deserialize, Serialize};

/// Per-candidate statistics that are not flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub candidate_id: String,
    pub session_id: String,
    pub item_count: usize,
    pub final_score: usize,
    pub response_times: ResponseTimeSummary,
    pub revisions: RevisionSummary,
}

/// Everything one run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Library version that produced the report.
    pub version: String,
    pub test_id: String,
    /// Deduplicated flags, all `open`.
    pub flags: Vec<Flag>,
    /// Ranked by risk score, highest first.
    pub risk_records: Vec<RiskRecord>,
    pub candidates: Vec<CandidateSummary>,
    pub similarity: SimilaritySummary,
    pub abstentions: Vec<Abstention>,
    pub metrics: RunMetrics,
}

impl DetectionReport {
    /// Flags naming a candidate.
    pub fn flags_for<'a>(&'a self, candidate_id: &'a str) -> impl Iterator<Item = &'a Flag> + 'a {
        self.flags.iter().filter(move |f| f.involves(candidate_id))
    }

    /// Flags of one kind.
    pub fn flags_of_kind(&self, kind: FlagKind) -> impl Iterator<Item = &Flag> + '_ {
        self.flags.iter().filter(move |f| f.kind == kind)
    }

    pub fn risk_for(&self, candidate_id: &str) -> Option<&RiskRecord> {
        self.risk_records
            .iter()
            .find(|r| r.candidate_id == candidate_id)
    }

    pub fn candidate(&self, candidate_id: &str) -> Option<&CandidateSummary> {
        self.candidates
            .iter()
            .find(|c| c.candidate_id == candidate_id)
    }

    /// Abstentions naming a candidate.
    pub fn abstentions_for<'a>(
        &'a self,
        candidate_id: &'a str,
    ) -> impl Iterator<Item = &'a Abstention> + 'a {
        self.abstentions
            .iter()
            .filter(move |a| a.subject_ids.iter().any(|s| s == candidate_id))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Serialization(e.to_string()))
    }
}
