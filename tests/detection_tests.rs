//! End-to-end detection scenarios.

use examguard::detectors::{SequentialDetector, SimilarityDetector, TimingDetector};
use examguard::*;
use std::collections::BTreeMap;

const KEY: &str = "ABCDABCDABCDABCDABCDABCDABCDABCDABCDABCDABCDABCDABCDABCDABCD";

fn key(i: usize) -> char {
    KEY.as_bytes()[i % KEY.len()] as char
}

/// Session from a choice string; `-` is an omission. Correctness is
/// checked against `KEY`.
fn session_from(candidate: &str, choices: &str, times: &[(u64, u64)]) -> CandidateSession {
    let events = choices
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let (ts, rt) = times[i];
            let item = format!("Q{:02}", i + 1);
            if c == '-' {
                ResponseEvent::new(candidate, "S1", &item, "A", false, ts, rt).omitted()
            } else {
                ResponseEvent::new(candidate, "S1", &item, &c.to_string(), c == key(i), ts, rt)
            }
        })
        .collect();
    CandidateSession::frozen("T1", candidate, "S1", events)
}

/// Evenly paced responses.
fn paced(n: usize, rt: u64) -> Vec<(u64, u64)> {
    (0..n).map(|i| ((i as u64 + 1) * (rt + 2_000), rt)).collect()
}

fn config_with_thresholds(thresholds: &[(SimilarityMetric, f64)]) -> DetectionConfig {
    let mut config = DetectionConfig::default();
    config.similarity.thresholds = thresholds.iter().copied().collect::<BTreeMap<_, _>>();
    config
}

#[test]
fn test_rapid_burst_raises_time_window_anomaly() {
    // 5 candidates, 15 items; A002 answers 8 items in under 5 s within 60 s
    let choices = [
        "ABDCBADCCABDBCA",
        "BADCCABDBCAABDC",
        "CABDBCAABDCBADC",
        "DBCAABDCBADCCAB",
        "ACBDDACBBDCAACB",
    ];
    let mut sessions = Vec::new();
    for (k, c) in choices.iter().enumerate() {
        let id = format!("A{:03}", k + 1);
        let times = if id == "A002" {
            let mut t: Vec<(u64, u64)> = (0..7).map(|i| (i * 45_000 + 40_000, 40_000)).collect();
            let burst_start = t[6].0 + 10_000;
            t.extend((0..8).map(|i| (burst_start + i * 6_000, 3_000)));
            t
        } else {
            paced(15, 35_000 + k as u64 * 1_000)
        };
        sessions.push(session_from(&id, c, &times));
    }

    let config = DetectionConfig::default();
    assert_eq!(config.timing.anomaly_successive_count, 5);
    assert_eq!(config.timing.anomaly_time_interval_seconds, 60.0);

    let engine = DetectionEngine::new(config).unwrap();
    let report = engine.run(&TestBatch::new("T1", sessions)).unwrap();

    let window: Vec<&Flag> = report.flags_of_kind(FlagKind::TimeWindowAnomaly).collect();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].subject_ids, vec!["A002"]);
    match &window[0].evidence {
        Evidence::TimeWindow {
            flagged_in_window, ..
        } => assert_eq!(*flagged_in_window, 8),
        other => panic!("unexpected evidence: {other:?}"),
    }
    let record = report.risk_for("A002").unwrap();
    assert_eq!(record.flag_counts[&FlagKind::TimeWindowAnomaly], 1);
    assert!(record.risk_score > 0.8);
}

#[test]
fn test_steady_rapid_guessing_keeps_every_item() {
    // One 1 s answer every 20 s for ten minutes
    let times: Vec<(u64, u64)> = (0..30u64).map(|i| ((i + 1) * 20_000, 1_000)).collect();
    let choices = &KEY[..30];
    let engine = DetectionEngine::new(DetectionConfig::default()).unwrap();
    let report = engine
        .run(&TestBatch::new("T1", vec![session_from("A001", choices, &times)]))
        .unwrap();

    assert_eq!(report.flags_of_kind(FlagKind::RapidGuessing).count(), 30);
    assert_eq!(report.metrics.duplicates_removed, 0);
    let record = report.risk_for("A001").unwrap();
    assert_eq!(record.flag_counts[&FlagKind::RapidGuessing], 30);
}

#[test]
fn test_shared_wrong_answers_scenario() {
    // 10 items both right, 50 items both wrong; 45 of those identical
    let mut a = String::new();
    let mut b = String::new();
    for i in 0..60 {
        let right = key(i);
        let wrong = if right == 'A' { 'B' } else { 'A' };
        let other_wrong = if right == 'C' { 'D' } else { 'C' };
        if i < 10 {
            a.push(right);
            b.push(right);
        } else if i < 55 {
            a.push(wrong);
            b.push(wrong);
        } else {
            a.push(wrong);
            b.push(if other_wrong == wrong { 'D' } else { other_wrong });
        }
    }
    let times = paced(60, 30_000);
    let sessions = vec![session_from("C001", &a, &times), session_from("C002", &b, &times)];

    let config = config_with_thresholds(&[(SimilarityMetric::IdenticalIncorrect, 0.65)]);
    let outcome = SimilarityDetector::new(&config.similarity).detect(&sessions);

    assert_eq!(outcome.output.flags.len(), 1);
    let flag = &outcome.output.flags[0];
    assert_eq!(flag.kind, FlagKind::PairwiseSimilarity);
    let Evidence::PairwiseSimilarity(evidence) = &flag.evidence else {
        panic!("unexpected evidence: {:?}", flag.evidence);
    };
    let rate = evidence
        .metrics
        .iter()
        .find(|m| m.metric == SimilarityMetric::IdenticalIncorrect)
        .and_then(|m| m.value)
        .unwrap();
    assert!((rate - 0.90).abs() < 1e-12);
    assert_eq!(evidence.fired, vec![SimilarityMetric::IdenticalIncorrect]);
    // 0.6 + 0.4 * (0.25 / 0.65)
    assert!((flag.confidence - (0.6 + 0.4 * 0.25 / 0.65)).abs() < 1e-9);
    assert_eq!(outcome.summary.primary_statistics_count, 1);
    assert_eq!(outcome.summary.g2_count, 0);
}

#[test]
fn test_run_boundary_scenario() {
    let config = SequentialConfig::default();
    assert_eq!(config.pattern_length, 6);
    let detector = SequentialDetector::new(&config);

    let times = paced(14, 20_000);
    let four = session_from("A001", "BCDAAAABCDBCAD", &times);
    assert!(detector.detect(&four, 4).flags.is_empty());

    let six = session_from("A001", "BCDAAAAAABCDBC", &times);
    let flags = detector.detect(&six, 4).flags;
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].kind, FlagKind::SequentialPattern);
}

#[test]
fn test_single_event_session() {
    let config = TimingConfig::default();
    let session = session_from("A001", "A", &[(1_000, 1_200)]);
    let outcome = TimingDetector::new(&config).detect(&session, &TimingBaselines::new());

    assert_eq!(outcome.output.count(FlagKind::TimeWindowAnomaly), 0);
    assert_eq!(outcome.output.count(FlagKind::RapidGuessing), 1);
    assert!(outcome.output.abstentions.iter().any(|a| matches!(
        a.reason,
        AbstentionReason::InsufficientData {
            required: 2,
            available: 1
        }
    )));
}

#[test]
fn test_transitive_clustering() {
    let a = "ABCDABCDABCDABCDDCBADCBA";
    let b = "ABCDABCDABCDABCDABCDABCD";
    let c = "DCBADCBAABCDABCDABCDABCD";
    let times = paced(24, 30_000);
    let sessions = vec![
        session_from("A001", a, &times),
        session_from("A002", b, &times),
        session_from("A003", c, &times),
    ];
    let config = config_with_thresholds(&[(SimilarityMetric::LongestRun, 14.0)]);
    let engine = DetectionEngine::new(config).unwrap();
    let report = engine.run(&TestBatch::new("T1", sessions)).unwrap();

    assert_eq!(report.similarity.flagged_pairs, 2);
    assert_eq!(report.similarity.clusters.len(), 1);
    assert_eq!(
        report.similarity.clusters[0].members,
        vec!["A001", "A002", "A003"]
    );
    // (A001, A003) alone is below threshold
    assert!(!report
        .flags_of_kind(FlagKind::PairwiseSimilarity)
        .any(|f| f.subject_ids == vec!["A001", "A003"]));
    for id in ["A001", "A002", "A003"] {
        assert!(report
            .flags_for(id)
            .any(|f| matches!(f.evidence, Evidence::SimilarityCluster(_))));
    }
}

#[test]
fn test_identical_sequences_flagged_at_any_threshold() {
    let choices = "ABCABDDCBACDABDCABCD";
    let times = paced(20, 30_000);
    let sessions = vec![
        session_from("A001", choices, &times),
        session_from("A002", choices, &times),
    ];
    let config = config_with_thresholds(&[(SimilarityMetric::IdenticalIncorrect, 1.0)]);
    assert!(config.validate().is_ok());
    let outcome = SimilarityDetector::new(&config.similarity).detect(&sessions);
    assert_eq!(outcome.output.flags.len(), 1);
}

#[test]
fn test_runs_are_deterministic() {
    let times = paced(15, 4_000);
    let sessions = vec![
        session_from("A001", "ABCDABCDABCDABC", &times),
        session_from("A002", "ABCDABCDABCDABD", &times),
        session_from("A003", "DCBAAAAAAABDCAB", &times),
    ];
    let engine = DetectionEngine::new(DetectionConfig::default()).unwrap();
    let batch = TestBatch::new("T1", sessions).with_cohort_baselines();
    let first = engine.run(&batch).unwrap();
    let second = engine.run(&batch).unwrap();
    assert_eq!(first, second);
    assert!(!first.flags.is_empty());
}

#[test]
fn test_report_json() {
    let times = paced(15, 3_000);
    let sessions = vec![session_from("A001", "AAAAAAABCDABCDA", &times)];
    let engine = DetectionEngine::new(DetectionConfig::default()).unwrap();
    let report = engine.run(&TestBatch::new("T1", sessions)).unwrap();

    let json = report.to_json_pretty().unwrap();
    assert!(json.contains("\"sequential-pattern\""));
    assert!(json.contains("\"rapid-guessing\""));

    let parsed = DetectionReport::from_json(&json).unwrap();
    assert_eq!(parsed.flags.len(), report.flags.len());
    assert_eq!(parsed.test_id, "T1");
    let ids: Vec<&str> = parsed.flags.iter().map(|f| f.id.as_str()).collect();
    let expected: Vec<&str> = report.flags.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, expected);
}

#[test]
fn test_store_pipeline_rejects_bad_batch() {
    let mut store = ResponseLogStore::new();
    store.open_session("T1", "A001", "S1").unwrap();
    store
        .append(ResponseEvent::new("A001", "S1", "Q1", "A", true, 1_000, 900))
        .unwrap();

    // Open sessions never leave the store
    assert!(store.frozen_sessions("T1").is_empty());

    // A hand-built batch with an open session fails the run
    let open = store.session("A001", "S1").unwrap().clone();
    let engine = DetectionEngine::new(DetectionConfig::default()).unwrap();
    let err = engine.run(&TestBatch::new("T1", vec![open])).unwrap_err();
    match err {
        EngineError::Validation(ValidationError::NotFrozen { context }) => {
            assert_eq!(context.candidate_id, "A001");
            assert_eq!(context.session_id, "S1");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_person_fit_through_engine() {
    // Easy items right, hard items wrong: implausibly clean pattern
    let events: Vec<ResponseEvent> = (0..20u64)
        .map(|i| {
            let easy = i % 2 == 0;
            ResponseEvent::new("A001", "S1", &format!("Q{}", i + 1), "B", easy, i * 40_000, 30_000)
                .with_difficulty(if easy { -1.0 } else { 1.0 })
        })
        .collect();
    let session = CandidateSession::frozen("T1", "A001", "S1", events);
    let mut abilities = AbilityEstimates::new();
    abilities.insert("A001", 0.0);

    let engine = DetectionEngine::new(DetectionConfig::default()).unwrap();
    let with = engine
        .run(&TestBatch::new("T1", vec![session.clone()]).with_abilities(abilities))
        .unwrap();
    assert_eq!(with.flags_of_kind(FlagKind::PersonFit).count(), 1);

    let without = engine.run(&TestBatch::new("T1", vec![session])).unwrap();
    assert_eq!(without.flags_of_kind(FlagKind::PersonFit).count(), 0);
    assert!(without
        .abstentions
        .iter()
        .any(|a| a.reason == AbstentionReason::MissingAbility));
}

#[test]
fn test_config_file_drives_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("detection.json");
    std::fs::write(
        &path,
        r#"{ "timing": { "rapid_guessing_threshold_seconds": 0.0 } }"#,
    )
    .unwrap();
    let config = DetectionConfig::from_json_file(&path).unwrap();
    let engine = DetectionEngine::new(config).unwrap();

    let times = paced(10, 500);
    let report = engine
        .run(&TestBatch::new("T1", vec![session_from("A001", "ABCDBADCAB", &times)]))
        .unwrap();
    assert_eq!(report.flags_of_kind(FlagKind::RapidGuessing).count(), 0);
}
