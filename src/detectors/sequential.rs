//! Repeating answer-choice patterns.
//!
//! The detector reads a candidate's final answers in presentation order and
//! looks for two pattern families:
//!
//! - **Runs**: one choice repeated `pattern_length` or more times (AAAAAA).
//! - **Cycles**: a unit of period `2..=pattern_length` repeated at least
//!   `max(2, ceil(pattern_length / period))` times back to back (ABCABC).
//!
//! Cycles are found with a direct period check: for each period `p`, maximal
//! stretches where `seq[i] == seq[i + p]` holds are periodic blocks. A block
//! whose unit is itself periodic with a smaller divisor period belongs to
//! that smaller period and is skipped. Omitted answers never match, so they
//! break both families.
//!
//! Runs are accepted first, then cycles by ascending period. A cycle that
//! overlaps an accepted pattern keeps only its longest free stretch, which
//! must still hold enough repeats on its own.
//!
//! Each period also gets a z-score of its lag-`p` agreement count against a
//! uniform-choice null. The z-score raises confidence, it does not gate the
//! flag.

use crate::config::SequentialConfig;
use crate::flag::{
    Abstention, AbstentionReason, DetectorKind, DetectorOutput, Evidence, Flag, FlagKind,
};
use crate::response::CandidateSession;
use crate::stats::margin_confidence;
use serde::{Deserialize, Serialize};

/// Confidence floor once the z-score clears its threshold.
const Z_CONFIDENCE_FLOOR: f64 = 0.8;

/// Evidence for a sequential-pattern flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEvidence {
    /// Matched choices.
    pub sequence: Vec<String>,
    /// Position of the first matched item in presentation order.
    pub start_index: usize,
    pub length: usize,
    /// 1 for runs.
    pub period: usize,
    /// Complete repetitions of the unit.
    pub occurrences: usize,
    /// Lag-`period` agreement z-score; `None` when the alphabet is degenerate.
    pub z_score: Option<f64>,
}

/// A detected pattern before it becomes a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pattern {
    start: usize,
    length: usize,
    period: usize,
}

impl Pattern {
    fn end(&self) -> usize {
        self.start + self.length
    }

    fn overlaps(&self, other: &Pattern) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Sequential pattern detector.
pub struct SequentialDetector<'a> {
    config: &'a SequentialConfig,
}

impl<'a> SequentialDetector<'a> {
    pub fn new(config: &'a SequentialConfig) -> Self {
        Self { config }
    }

    /// Scan one session. `alphabet_size` is the number of distinct choices
    /// seen across the test.
    pub fn detect(&self, session: &CandidateSession, alphabet_size: usize) -> DetectorOutput {
        let finals = session.final_answers();
        let seq: Vec<Option<&str>> = finals.iter().map(|e| e.choice.as_deref()).collect();
        let mut output = DetectorOutput::new();

        let answered = seq.iter().filter(|c| c.is_some()).count();
        let min_len = self.config.pattern_length;
        if answered < min_len {
            output.abstain(Abstention::for_candidate(
                DetectorKind::Sequential,
                &session.candidate_id,
                "pattern",
                AbstentionReason::InsufficientData {
                    required: min_len,
                    available: answered,
                },
            ));
            return output;
        }

        let patterns = self.find_patterns(&seq);
        let mut z_abstained = false;

        for pattern in patterns {
            let z_score = lag_z_score(&seq, pattern.period, alphabet_size);
            if z_score.is_none() && !z_abstained {
                z_abstained = true;
                output.abstain(Abstention::for_candidate(
                    DetectorKind::Sequential,
                    &session.candidate_id,
                    "z-score",
                    AbstentionReason::DegenerateDistribution {
                        detail: format!("alphabet size {}", alphabet_size),
                    },
                ));
            }

            let mut confidence = margin_confidence(pattern.length as f64, min_len as f64);
            if z_score.map_or(false, |z| z >= self.config.z_score_threshold) {
                confidence = confidence.max(Z_CONFIDENCE_FLOOR);
            }

            let sequence: Vec<String> = seq[pattern.start..pattern.end()]
                .iter()
                .map(|c| c.unwrap_or_default().to_string())
                .collect();
            let flag = Flag::for_candidate(
                FlagKind::SequentialPattern,
                &session.candidate_id,
                confidence,
                &format!("{}:{}", pattern.start, pattern.period),
                Evidence::SequentialPattern(PatternEvidence {
                    sequence,
                    start_index: pattern.start,
                    length: pattern.length,
                    period: pattern.period,
                    occurrences: pattern.length / pattern.period,
                    z_score,
                }),
            )
            .with_session(&session.session_id)
            .observed_at(finals[pattern.start].timestamp_ms);
            output.flag(flag);
        }

        log::debug!(
            "Sequential: candidate={}, items={}, patterns={}",
            session.candidate_id,
            seq.len(),
            output.flags.len()
        );
        output
    }

    /// Non-overlapping runs and cycles, runs first, then by ascending period.
    ///
    /// A cycle that overlaps an accepted pattern is cut down to its longest
    /// stretch outside them and kept if that stretch still has enough repeats.
    fn find_patterns(&self, seq: &[Option<&str>]) -> Vec<Pattern> {
        let min_len = self.config.pattern_length;
        let mut accepted = find_runs(seq, min_len);
        for period in 2..=min_len {
            let repeats = ((min_len + period - 1) / period).max(2);
            let required = period * repeats;
            for cycle in find_cycles(seq, period, required) {
                match largest_free_span(&cycle, &accepted) {
                    Some(span) if span.length >= required => accepted.push(span),
                    _ => {}
                }
            }
        }
        accepted.sort_by_key(|p| p.start);
        accepted
    }
}

/// Maximal runs of one answered choice, at least `min_len` long.
fn find_runs(seq: &[Option<&str>], min_len: usize) -> Vec<Pattern> {
    let mut runs = Vec::new();
    let mut start = 0;
    while start < seq.len() {
        let Some(choice) = seq[start] else {
            start += 1;
            continue;
        };
        let mut end = start + 1;
        while end < seq.len() && seq[end] == Some(choice) {
            end += 1;
        }
        if end - start >= min_len {
            runs.push(Pattern {
                start,
                length: end - start,
                period: 1,
            });
        }
        start = end;
    }
    runs
}

/// Maximal blocks with exact period `period`, at least `min_len` long.
fn find_cycles(seq: &[Option<&str>], period: usize, min_len: usize) -> Vec<Pattern> {
    let mut cycles = Vec::new();
    if seq.len() <= period {
        return cycles;
    }
    let agrees = |i: usize| seq[i].is_some() && seq[i] == seq[i + period];
    let limit = seq.len() - period;

    let mut i = 0;
    while i < limit {
        if !agrees(i) {
            i += 1;
            continue;
        }
        let start = i;
        while i < limit && agrees(i) {
            i += 1;
        }
        let length = i - start + period;
        if length >= min_len && !has_smaller_period(&seq[start..start + period]) {
            cycles.push(Pattern {
                start,
                length,
                period,
            });
        }
    }
    cycles
}

/// Longest part of `pattern` not covered by any of `accepted`.
fn largest_free_span(pattern: &Pattern, accepted: &[Pattern]) -> Option<Pattern> {
    let mut cuts: Vec<(usize, usize)> = accepted
        .iter()
        .filter(|a| a.overlaps(pattern))
        .map(|a| (a.start.max(pattern.start), a.end().min(pattern.end())))
        .collect();
    cuts.sort_unstable();
    cuts.push((pattern.end(), pattern.end()));

    let mut best: Option<Pattern> = None;
    let mut cursor = pattern.start;
    for (start, end) in cuts {
        if start > cursor && best.map_or(true, |b| start - cursor > b.length) {
            best = Some(Pattern {
                start: cursor,
                length: start - cursor,
                period: pattern.period,
            });
        }
        cursor = cursor.max(end);
    }
    best
}

/// Whether a cyclic unit repeats with a proper divisor period (runs included).
fn has_smaller_period(unit: &[Option<&str>]) -> bool {
    let p = unit.len();
    (1..p)
        .filter(|q| p % q == 0)
        .any(|q| (0..p).all(|j| unit[j] == unit[(j + q) % p]))
}

/// Z-score of lag-`lag` agreements against a uniform null over `alphabet_size`.
fn lag_z_score(seq: &[Option<&str>], lag: usize, alphabet_size: usize) -> Option<f64> {
    if alphabet_size < 2 || seq.len() <= lag {
        return None;
    }
    let mut pairs = 0usize;
    let mut agreements = 0usize;
    for i in 0..seq.len() - lag {
        if let (Some(a), Some(b)) = (seq[i], seq[i + lag]) {
            pairs += 1;
            if a == b {
                agreements += 1;
            }
        }
    }
    if pairs == 0 {
        return None;
    }
    let p = 1.0 / alphabet_size as f64;
    let n = pairs as f64;
    let expected = n * p;
    let variance = n * p * (1.0 - p);
    if !(variance > 0.0) {
        return None;
    }
    Some((agreements as f64 - expected) / variance.sqrt())
}
