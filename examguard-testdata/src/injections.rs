// ExamGuard Testdata - Behaviour injection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Cheating behaviours injected into generated cohorts.
//!
//! Each [`Injection`] rewrites one or two sessions of a [`Cohort`] in place
//! and keeps them valid: timestamps are re-derived from response times and
//! correctness follows the answer key.

use crate::error::{Result, TestdataError};
use crate::generator::{item_id, reflow, Cohort};
use examguard::{CandidateSession, FlagKind, ResponseEvent};
use serde::{Deserialize, Serialize};

/// Behaviour to inject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Injection {
    /// Consecutive items answered faster than a guess threshold.
    ///
    /// Expected detection: rapid-guessing, time-window-anomaly for long bursts
    RapidGuessing {
        candidate_id: String,
        start_item: usize,
        count: usize,
        response_ms: u64,
    },

    /// Same option on consecutive items.
    ///
    /// Expected detection: sequential-pattern
    AnswerRun {
        candidate_id: String,
        start_item: usize,
        length: usize,
        choice: String,
    },

    /// A block of options repeated back to back.
    ///
    /// Expected detection: sequential-pattern
    CyclicPattern {
        candidate_id: String,
        start_item: usize,
        pattern: Vec<String>,
        repeats: usize,
    },

    /// One item answered and then revised through `choices`.
    ///
    /// Expected detection: flip-flop when a choice comes back
    FlipFlop {
        candidate_id: String,
        item: usize,
        choices: Vec<String>,
        revision_ms: u64,
    },

    /// Target's final answers copied from the source on a block of items.
    ///
    /// Expected detection: pairwise-similarity on both
    Copying {
        source_id: String,
        target_id: String,
        start_item: usize,
        length: usize,
    },
}

impl Injection {
    /// Candidates whose sessions change.
    pub fn subjects(&self) -> Vec<&str> {
        match self {
            Injection::RapidGuessing { candidate_id, .. }
            | Injection::AnswerRun { candidate_id, .. }
            | Injection::CyclicPattern { candidate_id, .. }
            | Injection::FlipFlop { candidate_id, .. } => vec![candidate_id.as_str()],
            Injection::Copying {
                source_id,
                target_id,
                ..
            } => vec![source_id.as_str(), target_id.as_str()],
        }
    }

    /// Primary flag kind this behaviour should raise.
    pub fn expected_kind(&self) -> FlagKind {
        match self {
            Injection::RapidGuessing { .. } => FlagKind::RapidGuessing,
            Injection::AnswerRun { .. } | Injection::CyclicPattern { .. } => {
                FlagKind::SequentialPattern
            }
            Injection::FlipFlop { .. } => FlagKind::FlipFlop,
            Injection::Copying { .. } => FlagKind::PairwiseSimilarity,
        }
    }

    /// Rewrite the cohort.
    pub fn apply(&self, cohort: &mut Cohort) -> Result<()> {
        let items = cohort.item_count();
        match self {
            Injection::RapidGuessing {
                candidate_id,
                start_item,
                count,
                response_ms,
            } => {
                check_range(*start_item, *count, items)?;
                let (start_ms, gap_ms) = (cohort.start_ms, cohort.gap_ms);
                let session = cohort.session_mut(candidate_id)?;
                for i in *start_item..start_item + count {
                    if let Some(event) = first_attempt_mut(session, &item_id(i)) {
                        event.response_time_ms = *response_ms;
                    }
                }
                reflow(session, start_ms, gap_ms);
            }
            Injection::AnswerRun {
                candidate_id,
                start_item,
                length,
                choice,
            } => {
                check_range(*start_item, *length, items)?;
                let key = cohort.answer_key.clone();
                let session = cohort.session_mut(candidate_id)?;
                for i in *start_item..start_item + length {
                    set_final(session, i, Some(choice.as_str()), &key[i]);
                }
            }
            Injection::CyclicPattern {
                candidate_id,
                start_item,
                pattern,
                repeats,
            } => {
                let length = pattern.len() * repeats;
                check_range(*start_item, length, items)?;
                let key = cohort.answer_key.clone();
                let session = cohort.session_mut(candidate_id)?;
                for offset in 0..length {
                    let i = start_item + offset;
                    let choice = pattern[offset % pattern.len()].as_str();
                    set_final(session, i, Some(choice), &key[i]);
                }
            }
            Injection::FlipFlop {
                candidate_id,
                item,
                choices,
                revision_ms,
            } => {
                check_range(*item, 1, items)?;
                let key = cohort.answer_key[*item].clone();
                let (start_ms, gap_ms) = (cohort.start_ms, cohort.gap_ms);
                let session = cohort.session_mut(candidate_id)?;
                revise(session, &item_id(*item), choices, &key, *revision_ms);
                reflow(session, start_ms, gap_ms);
            }
            Injection::Copying {
                source_id,
                target_id,
                start_item,
                length,
            } => {
                check_range(*start_item, *length, items)?;
                let key = cohort.answer_key.clone();
                let source = cohort
                    .session(source_id)
                    .ok_or_else(|| TestdataError::UnknownCandidate(source_id.clone()))?;
                let copied: Vec<Option<String>> = (*start_item..start_item + length)
                    .map(|i| final_choice(source, &item_id(i)))
                    .collect();
                let target = cohort.session_mut(target_id)?;
                for (offset, choice) in copied.iter().enumerate() {
                    let i = start_item + offset;
                    set_final(target, i, choice.as_deref(), &key[i]);
                }
            }
        }
        Ok(())
    }
}

fn check_range(start: usize, len: usize, items: usize) -> Result<()> {
    let end = start + len;
    if len == 0 || end > items {
        return Err(TestdataError::ItemOutOfRange { start, end, items });
    }
    Ok(())
}

fn first_attempt_mut<'s>(
    session: &'s mut CandidateSession,
    item: &str,
) -> Option<&'s mut ResponseEvent> {
    session
        .events
        .iter_mut()
        .find(|e| e.item_id == item && e.revision_index == 0)
}

fn final_choice(session: &CandidateSession, item: &str) -> Option<String> {
    session
        .final_answers()
        .into_iter()
        .find(|e| e.item_id == item)
        .and_then(|e| e.choice.clone())
}

/// Set the final answer of item `index`; `None` leaves it blank.
fn set_final(session: &mut CandidateSession, index: usize, choice: Option<&str>, key: &str) {
    let item = item_id(index);
    let Some(event) = session
        .events
        .iter_mut()
        .filter(|e| e.item_id == item)
        .max_by_key(|e| e.revision_index)
    else {
        return;
    };
    event.choice = choice.map(str::to_string);
    event.is_correct = choice == Some(key);
}

/// Replace an item's events with a first attempt and one revision per
/// further choice, right where the first attempt was.
fn revise(session: &mut CandidateSession, item: &str, choices: &[String], key: &str, revision_ms: u64) {
    let Some(position) = session.events.iter().position(|e| e.item_id == item) else {
        return;
    };
    let Some((first, rest)) = choices.split_first() else {
        return;
    };
    let mut template = session.events[position].clone();
    session.events.retain(|e| e.item_id != item || e.revision_index == 0);

    template.choice = Some(first.clone());
    template.is_correct = first == key;
    template.revision_index = 0;
    session.events[position] = template.clone();

    for (n, choice) in rest.iter().enumerate() {
        let mut revision = template.clone().with_revision(n as u32 + 1);
        revision.choice = Some(choice.clone());
        revision.is_correct = choice == key;
        revision.response_time_ms = revision_ms;
        session.events.insert(position + n + 1, revision);
    }
}
