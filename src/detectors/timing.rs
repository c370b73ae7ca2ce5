//! Response-time checks.
//!
//! Three signals come from first-attempt response times:
//!
//! - **Rapid guessing**: faster than an absolute threshold.
//! - **Pre-knowledge / harvesting**: far below or above the item's peer
//!   baseline, measured as an outlier score `(observed - median) / MAD`.
//! - **Time-window anomaly**: enough of the above inside one sliding window.
//!
//! The window check runs a two-pointer sweep over the sorted timestamps of
//! flagged responses, so it is linear in event count.

use crate::baseline::TimingBaselines;
use crate::config::TimingConfig;
use crate::detectors::seconds_to_ms;
use crate::flag::{
    Abstention, AbstentionReason, DetectorKind, DetectorOutput, Evidence, Flag, FlagKind,
};
use crate::response::{CandidateSession, ResponseEvent};
use crate::stats::{
    margin_confidence, median, percentile_sorted, shortfall_confidence, FieldStats,
};
use serde::{Deserialize, Serialize};

/// Timed events the window check needs.
const MIN_TIMED_EVENTS: usize = 2;

/// Response-time distribution of one candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeSummary {
    pub count: usize,
    pub mean_ms: f64,
    pub std_ms: f64,
    pub median_ms: f64,
    pub p90_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub total_ms: u64,
}

impl ResponseTimeSummary {
    pub fn from_events(events: &[&ResponseEvent]) -> Self {
        if events.is_empty() {
            return Self::default();
        }
        let mut times: Vec<f64> = events.iter().map(|e| e.response_time_ms as f64).collect();
        let stats = FieldStats::from_samples(times.iter().copied());
        times.sort_by(f64::total_cmp);
        Self {
            count: events.len(),
            mean_ms: stats.mean,
            std_ms: stats.std,
            median_ms: median(&times).unwrap_or(0.0),
            p90_ms: percentile_sorted(&times, 0.9).unwrap_or(0.0),
            min_ms: events.iter().map(|e| e.response_time_ms).min().unwrap_or(0),
            max_ms: events.iter().map(|e| e.response_time_ms).max().unwrap_or(0),
            total_ms: events.iter().map(|e| e.response_time_ms).sum(),
        }
    }
}

/// Output of the timing detector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingOutcome {
    pub output: DetectorOutput,
    pub summary: ResponseTimeSummary,
}

/// Timing detector.
pub struct TimingDetector<'a> {
    config: &'a TimingConfig,
}

impl<'a> TimingDetector<'a> {
    pub fn new(config: &'a TimingConfig) -> Self {
        Self { config }
    }

    /// Run every timing check on one session.
    pub fn detect(&self, session: &CandidateSession, baselines: &TimingBaselines) -> TimingOutcome {
        let events = session.first_attempts();
        let mut output = DetectorOutput::new();
        // Timestamps of responses flagged fast or slow
        let mut flagged_ms: Vec<u64> = Vec::new();

        for event in &events {
            let mut flagged = false;
            if let Some(flag) = self.check_rapid(session, event) {
                output.flag(flag);
                flagged = true;
            }
            if !baselines.is_empty() {
                if let Some(flag) = self.check_outlier(session, event, baselines, &mut output) {
                    output.flag(flag);
                    flagged = true;
                }
            }
            if flagged {
                flagged_ms.push(event.timestamp_ms);
            }
        }

        if baselines.is_empty() && !events.is_empty() {
            output.abstain(Abstention::for_candidate(
                DetectorKind::Timing,
                &session.candidate_id,
                "outlier-score",
                AbstentionReason::MissingBaseline,
            ));
        }

        if events.len() < MIN_TIMED_EVENTS {
            output.abstain(Abstention::for_candidate(
                DetectorKind::Timing,
                &session.candidate_id,
                "time-window",
                AbstentionReason::InsufficientData {
                    required: MIN_TIMED_EVENTS,
                    available: events.len(),
                },
            ));
        } else if let Some(flag) = self.check_window(session, &mut flagged_ms) {
            output.flag(flag);
        }

        log::debug!(
            "Timing: candidate={}, events={}, flags={}",
            session.candidate_id,
            events.len(),
            output.flags.len()
        );

        TimingOutcome {
            output,
            summary: ResponseTimeSummary::from_events(&events),
        }
    }

    fn check_rapid(&self, session: &CandidateSession, event: &ResponseEvent) -> Option<Flag> {
        let threshold_ms = seconds_to_ms(self.config.rapid_guessing_threshold_seconds);
        if threshold_ms == 0 || event.response_time_ms >= threshold_ms {
            return None;
        }
        let ratio = event.response_time_ms as f64 / threshold_ms as f64;
        let flag = Flag::for_candidate(
            FlagKind::RapidGuessing,
            &session.candidate_id,
            shortfall_confidence(event.response_time_ms as f64, threshold_ms as f64),
            &event.item_id,
            Evidence::RapidGuess {
                item_id: event.item_id.clone(),
                response_time_ms: event.response_time_ms,
                threshold_ms,
                ratio,
            },
        );
        Some(
            flag.with_session(&session.session_id)
                .observed_at(event.timestamp_ms),
        )
    }

    fn check_outlier(
        &self,
        session: &CandidateSession,
        event: &ResponseEvent,
        baselines: &TimingBaselines,
        output: &mut DetectorOutput,
    ) -> Option<Flag> {
        let statistic = format!("outlier-score/{}", event.item_id);
        let Some(baseline) = baselines.get(&event.item_id) else {
            output.abstain(Abstention::for_candidate(
                DetectorKind::Timing,
                &session.candidate_id,
                statistic,
                AbstentionReason::MissingBaseline,
            ));
            return None;
        };
        let Some(os) = baseline.outlier_score(event.response_time_ms) else {
            output.abstain(Abstention::for_candidate(
                DetectorKind::Timing,
                &session.candidate_id,
                statistic,
                AbstentionReason::DegenerateDistribution {
                    detail: format!("zero MAD for item {}", event.item_id),
                },
            ));
            return None;
        };

        let pre = self.config.item_pre_knowledge_os_threshold;
        let harvest = self.config.item_harvesting_os_threshold;
        let (kind, threshold, confidence) = if os < -pre {
            (FlagKind::PreKnowledge, pre, margin_confidence(-os, pre))
        } else if os > harvest {
            (FlagKind::Harvesting, harvest, margin_confidence(os, harvest))
        } else {
            return None;
        };

        let flag = Flag::for_candidate(
            kind,
            &session.candidate_id,
            confidence,
            &event.item_id,
            Evidence::OutlierScore {
                item_id: event.item_id.clone(),
                response_time_ms: event.response_time_ms,
                median_ms: baseline.median_ms,
                mad_ms: baseline.mad_ms,
                outlier_score: os,
                threshold,
            },
        );
        Some(
            flag.with_session(&session.session_id)
                .observed_at(event.timestamp_ms),
        )
    }

    /// Densest window of flagged responses, via two pointers.
    fn check_window(&self, session: &CandidateSession, flagged_ms: &mut [u64]) -> Option<Flag> {
        let required = self.config.anomaly_successive_count;
        if flagged_ms.len() < required as usize {
            return None;
        }
        flagged_ms.sort_unstable();
        let window_ms = seconds_to_ms(self.config.anomaly_time_interval_seconds);

        let mut left = 0;
        let mut best = (0usize, 0usize, 0usize); // (count, left, right)
        for right in 0..flagged_ms.len() {
            while flagged_ms[right] - flagged_ms[left] > window_ms {
                left += 1;
            }
            let count = right - left + 1;
            if count > best.0 {
                best = (count, left, right);
            }
        }

        let (count, start, end) = best;
        if count < required as usize {
            return None;
        }
        let window_start_ms = flagged_ms[start];
        let flag = Flag::for_candidate(
            FlagKind::TimeWindowAnomaly,
            &session.candidate_id,
            margin_confidence(count as f64, required as f64),
            &window_start_ms.to_string(),
            Evidence::TimeWindow {
                flagged_in_window: count,
                required,
                window_ms,
                window_start_ms,
                window_end_ms: flagged_ms[end],
                flagged_total: flagged_ms.len(),
            },
        );
        Some(
            flag.with_session(&session.session_id)
                .observed_at(window_start_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::ItemTimingBaseline;
    use crate::flag::Severity;

    fn session(times: &[(u64, u64)]) -> CandidateSession {
        let events = times
            .iter()
            .enumerate()
            .map(|(i, &(ts, rt))| {
                ResponseEvent::new("A001", "S1", &format!("Q{}", i + 1), "A", true, ts, rt)
            })
            .collect();
        CandidateSession::frozen("T1", "A001", "S1", events)
    }

    #[test]
    fn test_rapid_guess_severity_scales() {
        let config = TimingConfig::default();
        let detector = TimingDetector::new(&config);
        let outcome = detector.detect(
            &session(&[(1_000, 500), (60_000, 4_000), (120_000, 30_000)]),
            &TimingBaselines::new(),
        );
        let rapid: Vec<_> = outcome
            .output
            .flags
            .iter()
            .filter(|f| f.kind == FlagKind::RapidGuessing)
            .collect();
        assert_eq!(rapid.len(), 2);
        // 10% of threshold
        assert_eq!(rapid[0].severity, Severity::Critical);
        // 80% of threshold
        assert_eq!(rapid[1].severity, Severity::Medium);
    }

    #[test]
    fn test_zero_response_time_is_maximally_fast() {
        let config = TimingConfig::default();
        let outcome = TimingDetector::new(&config)
            .detect(&session(&[(1_000, 0), (90_000, 20_000)]), &TimingBaselines::new());
        assert_eq!(outcome.output.flags[0].confidence, 1.0);
    }

    #[test]
    fn test_single_event_window_abstains_but_rapid_applies() {
        let config = TimingConfig::default();
        let outcome =
            TimingDetector::new(&config).detect(&session(&[(1_000, 200)]), &TimingBaselines::new());
        assert_eq!(outcome.output.count(FlagKind::RapidGuessing), 1);
        assert_eq!(outcome.output.count(FlagKind::TimeWindowAnomaly), 0);
        assert!(outcome
            .output
            .abstentions
            .iter()
            .any(|a| a.statistic == "time-window"));
    }

    #[test]
    fn test_window_flags_burst() {
        let config = TimingConfig::default();
        // Five fast answers 10 s apart
        let times: Vec<(u64, u64)> = (0..5).map(|i| (i * 10_000, 2_000)).collect();
        let outcome = TimingDetector::new(&config).detect(&session(&times), &TimingBaselines::new());
        assert_eq!(outcome.output.count(FlagKind::TimeWindowAnomaly), 1);
    }

    #[test]
    fn test_window_ignores_spread_out_flags() {
        let config = TimingConfig::default();
        // Five fast answers 2 minutes apart
        let times: Vec<(u64, u64)> = (0..5).map(|i| (i * 120_000, 2_000)).collect();
        let outcome = TimingDetector::new(&config).detect(&session(&times), &TimingBaselines::new());
        assert_eq!(outcome.output.count(FlagKind::RapidGuessing), 5);
        assert_eq!(outcome.output.count(FlagKind::TimeWindowAnomaly), 0);
    }

    #[test]
    fn test_outlier_scores() {
        let config = TimingConfig::default();
        let mut baselines = TimingBaselines::new();
        baselines.insert("Q1", ItemTimingBaseline::new(40_000.0, 5_000.0, 100));
        baselines.insert("Q2", ItemTimingBaseline::new(40_000.0, 5_000.0, 100));
        baselines.insert("Q3", ItemTimingBaseline::new(40_000.0, 5_000.0, 100));
        // OS: -4.4, +5.0, 0.0
        let outcome = TimingDetector::new(&config).detect(
            &session(&[(0, 18_000), (100_000, 65_000), (200_000, 40_000)]),
            &baselines,
        );
        assert_eq!(outcome.output.count(FlagKind::PreKnowledge), 1);
        assert_eq!(outcome.output.count(FlagKind::Harvesting), 1);
        assert_eq!(outcome.output.flags.len(), 2);
    }

    #[test]
    fn test_degenerate_baseline_abstains_per_item() {
        let config = TimingConfig::default();
        let mut baselines = TimingBaselines::new();
        baselines.insert("Q1", ItemTimingBaseline::new(40_000.0, 0.0, 100));
        let outcome = TimingDetector::new(&config)
            .detect(&session(&[(0, 18_000), (60_000, 20_000)]), &baselines);
        let stats: Vec<_> = outcome
            .output
            .abstentions
            .iter()
            .map(|a| (a.statistic.as_str(), &a.reason))
            .collect();
        assert!(stats.iter().any(|(s, r)| *s == "outlier-score/Q1"
            && matches!(r, AbstentionReason::DegenerateDistribution { .. })));
        assert!(stats
            .iter()
            .any(|(s, r)| *s == "outlier-score/Q2" && **r == AbstentionReason::MissingBaseline));
    }

    #[test]
    fn test_summary() {
        let config = TimingConfig::default();
        let outcome = TimingDetector::new(&config).detect(
            &session(&[(0, 10_000), (20_000, 20_000), (40_000, 30_000)]),
            &TimingBaselines::new(),
        );
        let s = &outcome.summary;
        assert_eq!(s.count, 3);
        assert_eq!(s.median_ms, 20_000.0);
        assert_eq!(s.min_ms, 10_000);
        assert_eq!(s.max_ms, 30_000);
        assert_eq!(s.total_ms, 60_000);
        assert!((s.mean_ms - 20_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_deterministic() {
        let config = TimingConfig::default();
        let times: Vec<(u64, u64)> = (0..8).map(|i| (i * 7_000, 1_500 + i * 100)).collect();
        let s = session(&times);
        let detector = TimingDetector::new(&config);
        let a = detector.detect(&s, &TimingBaselines::new());
        let b = detector.detect(&s, &TimingBaselines::new());
        assert_eq!(a, b);
    }
}
