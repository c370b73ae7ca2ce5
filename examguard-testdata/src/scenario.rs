// ExamGuard Testdata - Detection scenarios
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Scenario definitions for end-to-end detection tests.
//!
//! A scenario is a cohort recipe, the behaviours injected into it and the
//! flag kinds each candidate is expected to receive (or not).

use crate::error::Result;
use crate::generator::{generate_cohort, Cohort, CohortConfig};
use crate::injections::Injection;
use examguard::{DetectionEngine, DetectionReport, FlagKind, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Scenario definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub cohort: CohortConfig,
    #[serde(default)]
    pub injections: Vec<Injection>,
    #[serde(default)]
    pub expectations: Vec<Expectation>,
}

/// What one candidate should (and should not) be flagged for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    pub candidate_id: String,
    /// Kinds that must appear.
    #[serde(default)]
    pub present: Vec<FlagKind>,
    /// Kinds that must not appear.
    #[serde(default)]
    pub absent: Vec<FlagKind>,
    /// Lowest acceptable risk-record severity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<Severity>,
}

impl Expectation {
    pub fn flagged(candidate_id: &str, kinds: &[FlagKind]) -> Self {
        Self {
            candidate_id: candidate_id.to_string(),
            present: kinds.to_vec(),
            absent: Vec::new(),
            min_severity: None,
        }
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }
}

/// Outcome of checking a report against expectations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub failures: Vec<String>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Scenario {
    /// Load scenario from JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save scenario to JSON file.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Generate the cohort and apply every injection in order.
    pub fn build(&self) -> Result<Cohort> {
        let mut cohort = generate_cohort(&self.cohort)?;
        for injection in &self.injections {
            injection.apply(&mut cohort)?;
        }
        Ok(cohort)
    }

    /// Build, run the engine and check the report.
    pub fn run(&self, engine: &DetectionEngine) -> Result<(DetectionReport, ScenarioResult)> {
        let cohort = self.build()?;
        let report = engine.run(&cohort.to_batch())?;
        let result = check(&self.name, &report, &self.expectations);
        Ok((report, result))
    }

    /// One candidate guessing through a block of items.
    pub fn rapid_burst() -> Self {
        Self {
            name: "rapid_burst".to_string(),
            description: "Candidate answers eight items in under two seconds each".to_string(),
            cohort: CohortConfig::new().with_seed(101).with_candidates(8).with_items(30),
            injections: vec![Injection::RapidGuessing {
                candidate_id: "C0003".to_string(),
                start_item: 12,
                count: 8,
                response_ms: 1_500,
            }],
            expectations: vec![Expectation::flagged(
                "C0003",
                &[FlagKind::RapidGuessing, FlagKind::TimeWindowAnomaly],
            )
            .with_min_severity(Severity::High)],
        }
    }

    /// One candidate filling a block with the same option.
    pub fn answer_run() -> Self {
        Self {
            name: "answer_run".to_string(),
            description: "Candidate picks the same option on ten consecutive items".to_string(),
            cohort: CohortConfig::new().with_seed(202).with_candidates(8).with_items(30),
            injections: vec![Injection::AnswerRun {
                candidate_id: "C0005".to_string(),
                start_item: 10,
                length: 10,
                choice: "B".to_string(),
            }],
            expectations: vec![Expectation::flagged("C0005", &[FlagKind::SequentialPattern])],
        }
    }

    /// Three candidates copying from one source.
    pub fn copying_ring() -> Self {
        let copy = |target: &str| Injection::Copying {
            source_id: "C0001".to_string(),
            target_id: target.to_string(),
            start_item: 0,
            length: 30,
        };
        Self {
            name: "copying_ring".to_string(),
            description: "Two candidates copy every answer of a third".to_string(),
            cohort: CohortConfig::new().with_seed(303).with_candidates(10).with_items(30),
            injections: vec![copy("C0002"), copy("C0003")],
            expectations: ["C0001", "C0002", "C0003"]
                .iter()
                .map(|id| {
                    Expectation::flagged(id, &[FlagKind::PairwiseSimilarity])
                        .with_min_severity(Severity::Medium)
                })
                .collect(),
        }
    }

    /// One candidate changing an answer back and forth.
    pub fn flip_flopper() -> Self {
        let abc = ["A", "C", "A", "C"].iter().map(|c| c.to_string()).collect();
        Self {
            name: "flip_flopper".to_string(),
            description: "Candidate returns to an abandoned option twice".to_string(),
            cohort: CohortConfig::new().with_seed(404).with_candidates(6).with_items(20),
            injections: vec![Injection::FlipFlop {
                candidate_id: "C0004".to_string(),
                item: 7,
                choices: abc,
                revision_ms: 6_000,
            }],
            expectations: vec![Expectation::flagged("C0004", &[FlagKind::FlipFlop])],
        }
    }
}

/// Compare a report against expectations.
pub fn check(name: &str, report: &DetectionReport, expectations: &[Expectation]) -> ScenarioResult {
    let mut failures = Vec::new();
    for expectation in expectations {
        let id = expectation.candidate_id.as_str();
        let kinds: BTreeSet<FlagKind> = report.flags_for(id).map(|f| f.kind).collect();

        for kind in &expectation.present {
            if !kinds.contains(kind) {
                failures.push(format!("{id}: missing {}", kind.as_str()));
            }
        }
        for kind in &expectation.absent {
            if kinds.contains(kind) {
                failures.push(format!("{id}: unexpected {}", kind.as_str()));
            }
        }
        if let Some(min) = expectation.min_severity {
            match report.risk_for(id) {
                Some(record) if record.severity >= min => {}
                Some(record) => failures.push(format!(
                    "{id}: severity {} below {}",
                    record.severity.as_str(),
                    min.as_str()
                )),
                None => failures.push(format!("{id}: no risk record")),
            }
        }
    }
    ScenarioResult {
        scenario: name.to_string(),
        failures,
    }
}

/// Collection of predefined scenarios.
pub fn predefined_scenarios() -> Vec<Scenario> {
    vec![
        Scenario::rapid_burst(),
        Scenario::answer_run(),
        Scenario::copying_ring(),
        Scenario::flip_flopper(),
    ]
}
