//! Benchmarks for ExamGuard detector performance

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use examguard::detectors::{
    PersonFitDetector, RevisionDetector, SequentialDetector, SimilarityDetector, TimingDetector,
};
use examguard::{
    AbilityEstimates, CandidateSession, DetectionConfig, DetectionEngine, ItemParameters,
    ResponseEvent, TestBatch, TimingBaselines,
};

const CHOICES: [&str; 4] = ["A", "B", "C", "D"];

fn generate_cohort(candidates: usize, items: usize) -> Vec<CandidateSession> {
    (0..candidates)
        .map(|k| {
            let candidate = format!("C{:04}", k);
            let events = (0..items)
                .map(|i| {
                    let rt = 3_000 + ((k * 7 + i * 13) % 60) as u64 * 1_000;
                    ResponseEvent::new(
                        &candidate,
                        "S1",
                        &format!("Q{}", i + 1),
                        CHOICES[(k * 3 + i * 5 + i / 7) % 4],
                        (k + i) % 3 != 0,
                        i as u64 * 65_000,
                        rt,
                    )
                    .with_difficulty(((i % 9) as f64 - 4.0) * 0.5)
                })
                .collect();
            CandidateSession::frozen("T1", &candidate, "S1", events)
        })
        .collect()
}

fn bench_per_candidate(c: &mut Criterion) {
    let mut group = c.benchmark_group("per_candidate");

    // Setup
    let sessions = generate_cohort(100, 60);
    let baselines = TimingBaselines::from_sessions(&sessions);
    let config = DetectionConfig::default();
    let params = ItemParameters::new();

    group.throughput(Throughput::Elements(sessions.len() as u64));

    group.bench_function("timing_100", |b| {
        let detector = TimingDetector::new(&config.timing);
        b.iter(|| {
            for s in &sessions {
                black_box(detector.detect(s, &baselines));
            }
        })
    });

    group.bench_function("revision_100", |b| {
        let detector = RevisionDetector::new(&config.revision);
        b.iter(|| {
            for s in &sessions {
                black_box(detector.detect(s));
            }
        })
    });

    group.bench_function("sequential_100", |b| {
        let detector = SequentialDetector::new(&config.sequential);
        b.iter(|| {
            for s in &sessions {
                black_box(detector.detect(s, 4));
            }
        })
    });

    group.bench_function("person_fit_100", |b| {
        let detector = PersonFitDetector::new(&config.person_fit);
        b.iter(|| {
            for s in &sessions {
                black_box(detector.detect(s, Some(0.0), &params, None));
            }
        })
    });

    group.finish();
}

fn bench_similarity(c: &mut Criterion) {
    let mut group = c.benchmark_group("similarity");

    let sessions = generate_cohort(200, 60);
    let config = DetectionConfig::default();
    let pairs = (sessions.len() * (sessions.len() - 1) / 2) as u64;

    group.throughput(Throughput::Elements(pairs));

    group.bench_function("pairs_200_candidates", |b| {
        let detector = SimilarityDetector::new(&config.similarity);
        b.iter(|| black_box(detector.detect(&sessions)))
    });

    group.finish();
}

fn bench_full_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");

    let sessions = generate_cohort(200, 60);
    let abilities: AbilityEstimates = sessions
        .iter()
        .map(|s| (s.candidate_id.clone(), 0.0))
        .collect();
    let batch = TestBatch::new("T1", sessions)
        .with_cohort_baselines()
        .with_abilities(abilities);
    let engine = DetectionEngine::new(DetectionConfig::default()).expect("default config");

    group.throughput(Throughput::Elements(batch.sessions.len() as u64));

    group.bench_function("run_200_candidates", |b| {
        b.iter(|| black_box(engine.run(&batch)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_per_candidate,
    bench_similarity,
    bench_full_run
);
criterion_main!(benches);
