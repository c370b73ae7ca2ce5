// ExamGuard Testdata - Cohort generator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Synthetic cohort generation.
//!
//! Candidates answer under a one-parameter logistic model: each candidate
//! draws an ability, each item a difficulty, and the chance of a correct
//! answer is `1 / (1 + exp(-(theta - b)))`. Response times are log-normal.

use crate::error::{Result, TestdataError};
use chrono::{DateTime, TimeZone, Utc};
use examguard::{AbilityEstimates, CandidateSession, ResponseEvent, TestBatch};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{LogNormal, Normal};
use serde::{Deserialize, Serialize};

/// Session id given to every generated candidate.
pub const SESSION_ID: &str = "S1";

/// Cohort generator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortConfig {
    pub test_id: String,
    /// Number of candidates.
    pub candidates: usize,
    /// Number of items per candidate.
    pub items: usize,
    /// Option labels.
    pub choices: Vec<String>,
    /// Random seed for reproducibility.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// When every session starts.
    pub exam_start: DateTime<Utc>,
    /// Median response time in seconds.
    pub median_response_secs: f64,
    /// Log-normal shape of response times.
    pub response_time_sigma: f64,
    /// Response times are clamped to at least this.
    pub min_response_ms: u64,
    /// Pause between submitting one item and starting the next.
    pub gap_ms: u64,
    /// Standard deviation of candidate abilities.
    pub ability_std: f64,
    /// Standard deviation of item difficulties.
    pub difficulty_std: f64,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            test_id: "T1".to_string(),
            candidates: 20,
            items: 40,
            choices: ["A", "B", "C", "D"].iter().map(|c| c.to_string()).collect(),
            seed: None,
            exam_start: Utc
                .timestamp_millis_opt(1_706_745_600_000) // 2024-02-01 00:00:00 UTC
                .single()
                .unwrap_or_default(),
            median_response_secs: 40.0,
            response_time_sigma: 0.35,
            min_response_ms: 8_000,
            gap_ms: 2_000,
            ability_std: 1.0,
            difficulty_std: 1.0,
        }
    }
}

impl CohortConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_test_id(mut self, test_id: &str) -> Self {
        self.test_id = test_id.to_string();
        self
    }

    pub fn with_candidates(mut self, n: usize) -> Self {
        self.candidates = n;
        self
    }

    pub fn with_items(mut self, n: usize) -> Self {
        self.items = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_exam_start(mut self, start: DateTime<Utc>) -> Self {
        self.exam_start = start;
        self
    }

    /// Set the median response time in seconds.
    pub fn with_median_response_secs(mut self, secs: f64) -> Self {
        self.median_response_secs = secs;
        self
    }

    /// Exam start in epoch milliseconds (0 before 1970).
    pub fn start_ms(&self) -> u64 {
        u64::try_from(self.exam_start.timestamp_millis()).unwrap_or(0)
    }

    fn validate(&self) -> Result<()> {
        if self.choices.len() < 2 {
            return Err(TestdataError::InvalidConfig(
                "at least two choices are required".to_string(),
            ));
        }
        if self.median_response_secs.is_nan() || self.median_response_secs <= 0.0 {
            return Err(TestdataError::InvalidConfig(format!(
                "median_response_secs must be positive, got {}",
                self.median_response_secs
            )));
        }
        Ok(())
    }
}

/// Generated candidates with their ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    pub test_id: String,
    pub sessions: Vec<CandidateSession>,
    /// True abilities used to generate answers.
    pub abilities: AbilityEstimates,
    /// Correct option per item.
    pub answer_key: Vec<String>,
    /// Difficulty per item.
    pub difficulties: Vec<f64>,
    pub start_ms: u64,
    pub gap_ms: u64,
}

impl Cohort {
    pub fn session(&self, candidate_id: &str) -> Option<&CandidateSession> {
        self.sessions.iter().find(|s| s.candidate_id == candidate_id)
    }

    pub(crate) fn session_mut(&mut self, candidate_id: &str) -> Result<&mut CandidateSession> {
        self.sessions
            .iter_mut()
            .find(|s| s.candidate_id == candidate_id)
            .ok_or_else(|| TestdataError::UnknownCandidate(candidate_id.to_string()))
    }

    /// Candidate ids in generation order.
    pub fn candidate_ids(&self) -> Vec<&str> {
        self.sessions.iter().map(|s| s.candidate_id.as_str()).collect()
    }

    pub fn item_count(&self) -> usize {
        self.answer_key.len()
    }

    /// Detection input with cohort timing baselines and the true abilities.
    pub fn to_batch(&self) -> TestBatch {
        TestBatch::new(&self.test_id, self.sessions.clone())
            .with_cohort_baselines()
            .with_abilities(self.abilities.clone())
    }
}

/// Candidate id for a zero-based index.
pub fn candidate_id(index: usize) -> String {
    format!("C{:04}", index + 1)
}

/// Item id for a zero-based index.
pub fn item_id(index: usize) -> String {
    format!("Q{:03}", index + 1)
}

/// Generate a cohort of frozen sessions.
pub fn generate_cohort(config: &CohortConfig) -> Result<Cohort> {
    config.validate()?;
    let mut rng = match config.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let ability_dist = Normal::new(0.0, config.ability_std)
        .map_err(|e| TestdataError::InvalidConfig(format!("ability_std: {e}")))?;
    let difficulty_dist = Normal::new(0.0, config.difficulty_std)
        .map_err(|e| TestdataError::InvalidConfig(format!("difficulty_std: {e}")))?;
    let time_dist = LogNormal::new(
        (config.median_response_secs * 1000.0).ln(),
        config.response_time_sigma,
    )
    .map_err(|e| TestdataError::InvalidConfig(format!("response_time_sigma: {e}")))?;

    let answer_key: Vec<String> = (0..config.items)
        .map(|_| config.choices[rng.gen_range(0..config.choices.len())].clone())
        .collect();
    let difficulties: Vec<f64> = (0..config.items)
        .map(|_| difficulty_dist.sample(&mut rng))
        .collect();

    let start_ms = config.start_ms();
    let mut abilities = AbilityEstimates::new();
    let mut sessions = Vec::with_capacity(config.candidates);

    for k in 0..config.candidates {
        let candidate = candidate_id(k);
        let theta: f64 = ability_dist.sample(&mut rng);
        abilities.insert(&candidate, theta);

        let mut ts = start_ms;
        let mut events = Vec::with_capacity(config.items);
        for (i, (key, &b)) in answer_key.iter().zip(&difficulties).enumerate() {
            let p = 1.0 / (1.0 + (-(theta - b)).exp());
            let correct = rng.gen_bool(p.clamp(0.0, 1.0));
            let choice = if correct {
                key.clone()
            } else {
                wrong_choice(&config.choices, key, &mut rng)
            };
            let rt = (time_dist.sample(&mut rng) as u64).max(config.min_response_ms);
            ts += rt;
            events.push(
                ResponseEvent::new(&candidate, SESSION_ID, &item_id(i), &choice, correct, ts, rt)
                    .with_difficulty(b),
            );
            ts += config.gap_ms;
        }
        sessions.push(CandidateSession::frozen(
            &config.test_id,
            &candidate,
            SESSION_ID,
            events,
        ));
    }

    Ok(Cohort {
        test_id: config.test_id.clone(),
        sessions,
        abilities,
        answer_key,
        difficulties,
        start_ms,
        gap_ms: config.gap_ms,
    })
}

/// A uniformly drawn option other than `key`.
fn wrong_choice(choices: &[String], key: &str, rng: &mut impl Rng) -> String {
    let others: Vec<&String> = choices.iter().filter(|c| c.as_str() != key).collect();
    others[rng.gen_range(0..others.len())].clone()
}

/// Rewrite timestamps so each event ends `response_time_ms` after the
/// previous one plus the gap.
pub(crate) fn reflow(session: &mut CandidateSession, start_ms: u64, gap_ms: u64) {
    let mut ts = start_ms;
    for event in &mut session.events {
        ts += event.response_time_ms;
        event.timestamp_ms = ts;
        ts += gap_ms;
    }
}
