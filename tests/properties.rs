//! Property tests for the detectors.

use examguard::detectors::{SequentialDetector, SimilarityDetector};
use examguard::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

const CHOICES: [&str; 4] = ["A", "B", "C", "D"];

fn session_from(candidate: &str, choices: &[usize], correct: &[bool]) -> CandidateSession {
    let events = choices
        .iter()
        .zip(correct)
        .enumerate()
        .map(|(i, (&c, &ok))| {
            ResponseEvent::new(
                candidate,
                "S1",
                &format!("Q{}", i + 1),
                CHOICES[c],
                ok,
                i as u64 * 30_000,
                20_000,
            )
        })
        .collect();
    CandidateSession::frozen("T1", candidate, "S1", events)
}

/// Choice indices with their correctness against a fixed key.
fn answers(len: std::ops::Range<usize>) -> impl Strategy<Value = (Vec<usize>, Vec<bool>)> {
    prop::collection::vec(0usize..4, len).prop_map(|choices| {
        let correct = choices.iter().enumerate().map(|(i, &c)| c == i % 4).collect();
        (choices, correct)
    })
}

fn pair_metric(flags: &[Flag], metric: SimilarityMetric) -> Option<f64> {
    flags.iter().find_map(|f| match &f.evidence {
        Evidence::PairwiseSimilarity(e) => e
            .metrics
            .iter()
            .find(|m| m.metric == metric)
            .and_then(|m| m.value),
        _ => None,
    })
}

#[test]
fn run_of_pattern_length_is_flagged() {
    proptest!(|(len in 2usize..12, choice in 0usize..4)| {
        let config = SequentialConfig { pattern_length: len, ..SequentialConfig::default() };
        let detector = SequentialDetector::new(&config);
        let (before, after) = ((choice + 1) % 4, (choice + 2) % 4);

        let mut exact = vec![before];
        exact.extend(std::iter::repeat(choice).take(len));
        exact.push(after);
        let flags = detector.detect(&session_from("A001", &exact, &vec![true; exact.len()]), 4).flags;
        prop_assert_eq!(flags.len(), 1);

        let mut short = vec![before];
        short.extend(std::iter::repeat(choice).take(len - 1));
        short.push(after);
        let flags = detector.detect(&session_from("A001", &short, &vec![true; short.len()]), 4).flags;
        prop_assert!(flags.is_empty());
    });
}

#[test]
fn identical_answer_strings_saturate_rates() {
    proptest!(|((choices, correct) in answers(1..40))| {
        let sessions = vec![
            session_from("A001", &choices, &correct),
            session_from("A002", &choices, &correct),
        ];
        // Nothing here could fire on its own
        let config = SimilarityConfig {
            thresholds: BTreeMap::from([(SimilarityMetric::LongestRun, 1_000.0)]),
            ..SimilarityConfig::default()
        };
        let outcome = SimilarityDetector::new(&config).detect(&sessions);

        prop_assert_eq!(outcome.output.flags.len(), 1);
        prop_assert_eq!(outcome.summary.pairs_abstained, 0);
        let flags = &outcome.output.flags;
        prop_assert_eq!(flags[0].confidence, 1.0);
        prop_assert_eq!(pair_metric(flags, SimilarityMetric::IdenticalIncorrect), Some(1.0));
        prop_assert_eq!(pair_metric(flags, SimilarityMetric::JointMatch), Some(1.0));
        prop_assert_eq!(pair_metric(flags, SimilarityMetric::LongestRun), Some(choices.len() as f64));
    });
}

#[test]
fn similarity_is_symmetric() {
    proptest!(|((a, ca) in answers(12..13), (b, cb) in answers(12..13))| {
        let config = SimilarityConfig::default();
        let detector = SimilarityDetector::new(&config);
        let forward = detector.detect(&[session_from("A001", &a, &ca), session_from("A002", &b, &cb)]);
        let backward = detector.detect(&[session_from("A002", &b, &cb), session_from("A001", &a, &ca)]);

        prop_assert_eq!(forward.output.flags.len(), backward.output.flags.len());
        for metric in SimilarityMetric::ALL {
            let f = pair_metric(&forward.output.flags, metric);
            let b = pair_metric(&backward.output.flags, metric);
            prop_assert_eq!(f.is_some(), b.is_some());
            if let (Some(f), Some(b)) = (f, b) {
                prop_assert!((f - b).abs() < 1e-9);
            }
        }
    });
}

#[test]
fn runs_are_reproducible_and_bounded() {
    let cohorts = prop::collection::vec(answers(10..20), 2..6);
    proptest!(ProptestConfig::with_cases(32), |(cohort in cohorts)| {
        let sessions: Vec<CandidateSession> = cohort
            .iter()
            .enumerate()
            .map(|(k, (choices, correct))| session_from(&format!("A{:03}", k + 1), choices, correct))
            .collect();
        let batch = TestBatch::new("T1", sessions).with_cohort_baselines();
        let engine = DetectionEngine::new(DetectionConfig::default()).unwrap();

        let first = engine.run(&batch).unwrap();
        let second = engine.run(&batch).unwrap();
        prop_assert_eq!(&first, &second);

        prop_assert_eq!(first.risk_records.len(), cohort.len());
        for record in &first.risk_records {
            prop_assert!((0.0..=1.0).contains(&record.risk_score));
            prop_assert_eq!(record.severity, severity_band(record.risk_score));
        }
        for pair in first.risk_records.windows(2) {
            prop_assert!(pair[0].risk_score >= pair[1].risk_score);
        }
        for flag in &first.flags {
            prop_assert!((0.0..=1.0).contains(&flag.confidence));
            prop_assert_eq!(flag.severity, severity_band(flag.confidence));
            prop_assert_eq!(flag.status, FlagStatus::Open);
        }
    });
}

#[test]
fn deduplication_is_idempotent() {
    let observations = prop::collection::vec((0usize..3, 0u64..200_000, 1u32..10), 1..30);
    proptest!(|(observations in observations)| {
        let flags: Vec<Flag> = observations
            .iter()
            .map(|&(item, ts, tenths)| {
                Flag::for_candidate(
                    FlagKind::RapidGuessing,
                    "A001",
                    tenths as f64 / 10.0,
                    &format!("Q{item}"),
                    Evidence::RapidGuess {
                        item_id: format!("Q{item}"),
                        response_time_ms: 1_000,
                        threshold_ms: 5_000,
                        ratio: 0.2,
                    },
                )
                .observed_at(ts)
            })
            .collect();
        let config = AggregationConfig::default();
        let aggregator = Aggregator::new(&config);
        let once = aggregator.deduplicate(flags.clone());
        let twice = aggregator.deduplicate(once.clone());
        prop_assert_eq!(&once, &twice);

        // Every observation is still represented within one window
        for flag in &flags {
            let at = flag.observed_at_ms.unwrap();
            let represented = once.iter().any(|kept| {
                kept.id == flag.id
                    && kept.observed_at_ms.unwrap().abs_diff(at) < config.dedup_window_ms
                    && kept.confidence >= flag.confidence
            });
            prop_assert!(represented);
        }
    });
}
