//! DetectionEngine - orchestration of one detection run.
//!
//! A run takes every frozen session of one test, validates the whole batch,
//! runs the per-candidate detectors in parallel across candidates, runs the
//! pairwise similarity detector once, and aggregates all flags into ranked
//! risk records. Any validation error fails the run for the test.

use crate::aggregator::Aggregator;
use crate::baseline::TimingBaselines;
use crate::config::DetectionConfig;
use crate::detectors::person_fit::{AbilityEstimates, ItemParameters, PersonFitDetector};
use crate::detectors::revision::RevisionDetector;
use crate::detectors::sequential::SequentialDetector;
use crate::detectors::similarity::SimilarityDetector;
use crate::detectors::timing::TimingDetector;
use crate::error::{Result, ValidationError};
use crate::flag::DetectorOutput;
use crate::metrics::RunMetrics;
use crate::report::{CandidateSummary, DetectionReport};
use crate::response::{validate_session, CandidateSession};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Input of one detection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestBatch {
    pub test_id: String,
    pub sessions: Vec<CandidateSession>,
    /// Per-item peer response-time baselines.
    #[serde(default)]
    pub baselines: TimingBaselines,
    /// Per-candidate ability estimates.
    #[serde(default)]
    pub abilities: AbilityEstimates,
    /// Per-item IRT parameters overriding event difficulties.
    #[serde(default)]
    pub item_parameters: ItemParameters,
}

impl TestBatch {
    pub fn new(test_id: &str, sessions: Vec<CandidateSession>) -> Self {
        Self {
            test_id: test_id.to_string(),
            sessions,
            ..Self::default()
        }
    }

    pub fn with_baselines(mut self, baselines: TimingBaselines) -> Self {
        self.baselines = baselines;
        self
    }

    /// Derive baselines from this batch's own first-attempt times.
    pub fn with_cohort_baselines(mut self) -> Self {
        self.baselines = TimingBaselines::from_sessions(&self.sessions);
        self
    }

    pub fn with_abilities(mut self, abilities: AbilityEstimates) -> Self {
        self.abilities = abilities;
        self
    }

    pub fn with_item_parameters(mut self, item_parameters: ItemParameters) -> Self {
        self.item_parameters = item_parameters;
        self
    }

    /// Distinct answered choices across the batch.
    pub fn alphabet_size(&self) -> usize {
        self.sessions
            .iter()
            .flat_map(|s| s.events.iter())
            .filter_map(|e| e.choice.as_deref())
            .collect::<BTreeSet<&str>>()
            .len()
    }
}

/// Per-candidate detector results.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateDetection {
    pub output: DetectorOutput,
    pub summary: CandidateSummary,
}

/// Detection engine holding one validated configuration.
#[derive(Debug, Clone)]
pub struct DetectionEngine {
    config: DetectionConfig,
}

impl DetectionEngine {
    /// Create an engine. The configuration is validated once here.
    pub fn new(config: DetectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Run every detector over a test batch.
    pub fn run(&self, batch: &TestBatch) -> Result<DetectionReport> {
        if let Err(e) = validate_batch(batch) {
            log::warn!("Rejected batch for test {}: {}", batch.test_id, e);
            return Err(e.into());
        }

        let alphabet_size = batch.alphabet_size();
        let detections: Vec<CandidateDetection> = batch
            .sessions
            .par_iter()
            .map(|session| self.run_candidate(session, batch, alphabet_size))
            .collect();

        let similarity = SimilarityDetector::new(&self.config.similarity).detect(&batch.sessions);

        let mut metrics = RunMetrics::new();
        metrics.candidates = batch.sessions.len();
        metrics.events = batch.sessions.iter().map(|s| s.events.len()).sum();
        metrics.pairs_evaluated = similarity.summary.pairs_evaluated;

        let mut flags = Vec::new();
        let mut abstentions = Vec::new();
        let mut candidates = Vec::with_capacity(detections.len());
        for detection in detections {
            flags.extend(detection.output.flags);
            abstentions.extend(detection.output.abstentions);
            candidates.push(detection.summary);
        }
        flags.extend(similarity.output.flags);
        abstentions.extend(similarity.output.abstentions);

        let candidate_ids: Vec<String> =
            batch.sessions.iter().map(|s| s.candidate_id.clone()).collect();
        let aggregation =
            Aggregator::new(&self.config.aggregation).aggregate(flags, &candidate_ids);

        metrics.duplicates_removed = aggregation.duplicates_removed;
        for flag in &aggregation.flags {
            metrics.record_flag(flag);
        }
        for abstention in &abstentions {
            metrics.record_abstention(abstention);
        }

        log::info!(
            "Detection run for test {}: candidates={}, flags={}, abstentions={}, clusters={}",
            batch.test_id,
            metrics.candidates,
            metrics.flags_total,
            abstentions.len(),
            similarity.summary.clusters.len()
        );

        Ok(DetectionReport {
            version: crate::VERSION.to_string(),
            test_id: batch.test_id.clone(),
            flags: aggregation.flags,
            risk_records: aggregation.risk_records,
            candidates,
            similarity: similarity.summary,
            abstentions,
            metrics,
        })
    }

    /// Run the per-candidate detectors on one session of a batch.
    pub fn detect_candidate(
        &self,
        session: &CandidateSession,
        batch: &TestBatch,
    ) -> Result<CandidateDetection> {
        validate_frozen(session, &batch.test_id)?;
        Ok(self.run_candidate(session, batch, batch.alphabet_size()))
    }

    fn run_candidate(
        &self,
        session: &CandidateSession,
        batch: &TestBatch,
        alphabet_size: usize,
    ) -> CandidateDetection {
        let timing = TimingDetector::new(&self.config.timing).detect(session, &batch.baselines);
        let revision = RevisionDetector::new(&self.config.revision).detect(session);
        let sequential =
            SequentialDetector::new(&self.config.sequential).detect(session, alphabet_size);
        let person_fit = PersonFitDetector::new(&self.config.person_fit).detect(
            session,
            batch.abilities.get(&session.candidate_id),
            &batch.item_parameters,
            Some(&revision.summary),
        );

        let mut output = DetectorOutput::new();
        output.extend(timing.output);
        output.extend(revision.output);
        output.extend(sequential);
        output.extend(person_fit);

        CandidateDetection {
            output,
            summary: CandidateSummary {
                candidate_id: session.candidate_id.clone(),
                session_id: session.session_id.clone(),
                item_count: session.item_count(),
                final_score: session.final_score(),
                response_times: timing.summary,
                revisions: revision.summary,
            },
        }
    }
}

fn validate_frozen(session: &CandidateSession, test_id: &str) -> std::result::Result<(), ValidationError> {
    if !session.is_frozen() {
        return Err(ValidationError::NotFrozen {
            context: session.context(),
        });
    }
    if session.test_id != test_id {
        return Err(ValidationError::WrongTest {
            context: session.context(),
            expected: test_id.to_string(),
            found: session.test_id.clone(),
        });
    }
    validate_session(session)
}

fn validate_batch(batch: &TestBatch) -> std::result::Result<(), ValidationError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for session in &batch.sessions {
        validate_frozen(session, &batch.test_id)?;
        if !seen.insert(session.candidate_id.as_str()) {
            return Err(ValidationError::DuplicateCandidate(
                session.candidate_id.clone(),
            ));
        }
    }
    Ok(())
}
