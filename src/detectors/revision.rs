//! Answer-revision patterns.
//!
//! Each item's events, ordered by revision index, form a chain of
//! `(choice, is_correct)` states. The detector flags chains that return to
//! an abandoned choice (flip-flop), chains whose revisions come faster than
//! `rapid_revision_seconds` (rapid revision), and candidates who revise too
//! large a share of their items (answer change). Wrong/right transition
//! tallies are carried in [`RevisionSummary`] for person-fit weighting.

use crate::config::RevisionConfig;
use crate::detectors::seconds_to_ms;
use crate::flag::{
    Abstention, AbstentionReason, DetectorKind, DetectorOutput, Evidence, Flag, FlagKind,
};
use crate::response::{CandidateSession, ResponseEvent};
use crate::stats::{margin_confidence, shortfall_confidence, THRESHOLD_CONFIDENCE};
use serde::{Deserialize, Serialize};

/// Cap on flip-flop confidence.
const FLIP_FLOP_MAX_CONFIDENCE: f64 = 0.95;

/// Wrong/right transition tallies between consecutive revisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionCounts {
    /// Wrong to right.
    pub wr: usize,
    /// Wrong to wrong.
    pub ww: usize,
    /// Right to wrong.
    pub rw: usize,
    /// Right to right.
    pub rr: usize,
}

impl TransitionCounts {
    pub fn record(&mut self, from_correct: bool, to_correct: bool) {
        match (from_correct, to_correct) {
            (false, true) => self.wr += 1,
            (false, false) => self.ww += 1,
            (true, false) => self.rw += 1,
            (true, true) => self.rr += 1,
        }
    }

    pub fn add(&mut self, other: &TransitionCounts) {
        self.wr += other.wr;
        self.ww += other.ww;
        self.rw += other.rw;
        self.rr += other.rr;
    }

    /// Total erasures.
    pub fn total(&self) -> usize {
        self.wr + self.ww + self.rw + self.rr
    }

    /// Wrong-to-right share of all erasures.
    pub fn wr_te_ratio(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            te => Some(self.wr as f64 / te as f64),
        }
    }
}

/// Revision history of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRevisionSummary {
    pub item_id: String,
    pub revisions: usize,
    pub transitions: TransitionCounts,
    pub hard: bool,
}

/// Per-candidate revision evidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisionSummary {
    pub attempted_items: usize,
    pub revised_items: usize,
    pub answer_change_percentage: f64,
    pub transitions: TransitionCounts,
    pub total_erasures: usize,
    pub wr_te_ratio: Option<f64>,
    /// Wrong-to-right changes on items above the hard-item difficulty.
    pub hard_item_wr: usize,
    /// Revised items only.
    pub items: Vec<ItemRevisionSummary>,
}

/// Output of the revision detector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevisionOutcome {
    pub output: DetectorOutput,
    pub summary: RevisionSummary,
}

/// Revision pattern detector.
pub struct RevisionDetector<'a> {
    config: &'a RevisionConfig,
}

impl<'a> RevisionDetector<'a> {
    pub fn new(config: &'a RevisionConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, session: &CandidateSession) -> RevisionOutcome {
        let mut output = DetectorOutput::new();
        let mut summary = RevisionSummary::default();

        for (item_id, events) in session.revisions_by_item() {
            summary.attempted_items += 1;
            if events.len() < 2 {
                continue;
            }
            summary.revised_items += 1;

            let mut transitions = TransitionCounts::default();
            for pair in events.windows(2) {
                transitions.record(pair[0].is_correct, pair[1].is_correct);
            }
            let hard = events[0].item_difficulty > self.config.hard_item_difficulty;
            if hard {
                summary.hard_item_wr += transitions.wr;
            }
            summary.transitions.add(&transitions);
            summary.items.push(ItemRevisionSummary {
                item_id: item_id.to_string(),
                revisions: events.len() - 1,
                transitions,
                hard,
            });

            if let Some(flag) = flip_flop(session, item_id, &events) {
                output.flag(flag);
            }
            if let Some(flag) = self.rapid_revision(session, item_id, &events) {
                output.flag(flag);
            }
        }

        summary.total_erasures = summary.transitions.total();
        summary.wr_te_ratio = summary.transitions.wr_te_ratio();

        if summary.attempted_items == 0 {
            output.abstain(Abstention::for_candidate(
                DetectorKind::Revision,
                &session.candidate_id,
                "answer-change",
                AbstentionReason::InsufficientData {
                    required: 1,
                    available: 0,
                },
            ));
        } else {
            summary.answer_change_percentage =
                summary.revised_items as f64 / summary.attempted_items as f64 * 100.0;
            if let Some(flag) = self.answer_change(session, &summary) {
                output.flag(flag);
            }
        }

        log::debug!(
            "Revision: candidate={}, revised={}/{}, erasures={}, flags={}",
            session.candidate_id,
            summary.revised_items,
            summary.attempted_items,
            summary.total_erasures,
            output.flags.len()
        );

        RevisionOutcome { output, summary }
    }

    fn rapid_revision(
        &self,
        session: &CandidateSession,
        item_id: &str,
        events: &[&ResponseEvent],
    ) -> Option<Flag> {
        let threshold_ms = seconds_to_ms(self.config.rapid_revision_seconds);
        if threshold_ms == 0 {
            return None;
        }
        let deltas: Vec<u64> = events
            .windows(2)
            .map(|pair| pair[1].timestamp_ms.saturating_sub(pair[0].timestamp_ms))
            .filter(|&delta| delta < threshold_ms)
            .collect();
        let min_delta_ms = deltas.iter().copied().min()?;

        let flag = Flag::for_candidate(
            FlagKind::RapidRevision,
            &session.candidate_id,
            shortfall_confidence(min_delta_ms as f64, threshold_ms as f64),
            item_id,
            Evidence::RapidRevision {
                item_id: item_id.to_string(),
                min_delta_ms,
                threshold_ms,
                rapid_changes: deltas.len(),
            },
        );
        let last_ms = events.last().map_or(0, |e| e.timestamp_ms);
        Some(flag.with_session(&session.session_id).observed_at(last_ms))
    }

    fn answer_change(&self, session: &CandidateSession, summary: &RevisionSummary) -> Option<Flag> {
        let threshold = self.config.answer_change_percentage_threshold;
        if summary.answer_change_percentage <= threshold {
            return None;
        }
        let flag = Flag::for_candidate(
            FlagKind::AnswerChange,
            &session.candidate_id,
            margin_confidence(summary.answer_change_percentage, threshold),
            "session",
            Evidence::AnswerChange {
                revised_items: summary.revised_items,
                attempted_items: summary.attempted_items,
                percentage: summary.answer_change_percentage,
                threshold,
                transitions: summary.transitions,
            },
        );
        let flag = flag.with_session(&session.session_id);
        Some(match session.last_timestamp_ms() {
            Some(ms) => flag.observed_at(ms),
            None => flag,
        })
    }
}

/// Flag an item whose chain returns to a previously abandoned choice.
fn flip_flop(session: &CandidateSession, item_id: &str, events: &[&ResponseEvent]) -> Option<Flag> {
    let choices: Vec<Option<String>> = events.iter().map(|e| e.choice.clone()).collect();
    let mut abandoned: Vec<&Option<String>> = Vec::new();
    let mut current = choices.first()?;
    let mut returns = 0;

    for next in &choices[1..] {
        if next == current {
            continue;
        }
        if abandoned.contains(&next) {
            returns += 1;
        }
        if !abandoned.contains(&current) {
            abandoned.push(current);
        }
        current = next;
    }

    if returns == 0 {
        return None;
    }
    let confidence =
        (THRESHOLD_CONFIDENCE + 0.1 * (returns - 1) as f64).min(FLIP_FLOP_MAX_CONFIDENCE);
    let last_ms = events.last().map_or(0, |e| e.timestamp_ms);
    let flag = Flag::for_candidate(
        FlagKind::FlipFlop,
        &session.candidate_id,
        confidence,
        item_id,
        Evidence::FlipFlop {
            item_id: item_id.to_string(),
            choices,
            returns,
        },
    );
    Some(flag.with_session(&session.session_id).observed_at(last_ms))
}
