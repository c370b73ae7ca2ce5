//! # ExamGuard - Exam Response Anomaly Engine
//!
//! Detection core for exam forensics: reads frozen candidate response logs
//! for one test and produces flags with severity and confidence, plus ranked
//! per-candidate risk records.
//!
//! ## Key Features
//!
//! - **Timing**: rapid guessing, pre-knowledge, harvesting, time-window bursts
//! - **Revisions**: flip-flops, rapid revisions, answer-change rate
//! - **Sequences**: runs and cycles of answer choices
//! - **Person-fit**: IRT residual analysis per section
//! - **Similarity**: six pairwise metrics with union-find clustering
//! - **Explicit abstentions**: "not checked" never looks like "clean"
//!
//! ## Quick Start
//!
//! ```rust
//! use examguard::{CandidateSession, DetectionConfig, DetectionEngine, FlagKind, ResponseEvent, TestBatch};
//!
//! // Eight answers under five seconds, ten seconds apart
//! let events = (0..8u64)
//!     .map(|i| ResponseEvent::new("A002", "S1", &format!("Q{}", i + 1), "B", false, i * 10_000, 1_500))
//!     .collect();
//! let session = CandidateSession::frozen("T1", "A002", "S1", events);
//!
//! let engine = DetectionEngine::new(DetectionConfig::default()).unwrap();
//! let report = engine.run(&TestBatch::new("T1", vec![session])).unwrap();
//!
//! assert!(report.flags_of_kind(FlagKind::TimeWindowAnomaly).count() == 1);
//! assert_eq!(report.risk_records[0].candidate_id, "A002");
//! ```
//!
//! ## Modules
//!
//! - [`response`]: Response events and candidate sessions
//! - [`store`]: Append-only response log store
//! - [`config`]: Detection thresholds
//! - [`detectors`]: Timing, revision, sequential, person-fit, similarity
//! - [`aggregator`]: Deduplication, severity bands and risk scores
//! - [`engine`]: Batch orchestration
//! - [`report`]: Serializable run output

// Modules
pub mod aggregator;
pub mod baseline;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod flag;
pub mod metrics;
pub mod report;
pub mod response;
pub mod stats;
pub mod store;

// Re-exports for convenient access
pub use aggregator::{severity_band, Aggregation, Aggregator, RiskRecord};
pub use baseline::{ItemTimingBaseline, TimingBaselines};
pub use config::{
    AggregationConfig, DetectionConfig, PersonFitConfig, RevisionConfig, SequentialConfig,
    SimilarityConfig, TimingConfig,
};
pub use detectors::{
    AbilityEstimates, ItemParameter, ItemParameters, ResponseTimeSummary, RevisionSummary,
    SimilarityMetric, SimilaritySummary, TransitionCounts,
};
pub use engine::{CandidateDetection, DetectionEngine, TestBatch};
pub use error::{ConfigError, EngineError, RecordContext, Result, StoreError, ValidationError};
pub use flag::{
    Abstention, AbstentionReason, DetectorKind, DetectorOutput, Evidence, Flag, FlagKind,
    FlagStatus, Severity,
};
pub use metrics::RunMetrics;
pub use report::{CandidateSummary, DetectionReport};
pub use response::{validate_session, CandidateSession, ResponseEvent, SessionState};
pub use store::ResponseLogStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_store_to_report() {
        let mut store = ResponseLogStore::new();
        store.open_session("T1", "A001", "S1").unwrap();
        for i in 0..6u64 {
            let event =
                ResponseEvent::new("A001", "S1", &format!("Q{}", i + 1), "C", true, i * 20_000, 15_000);
            store.append(event).unwrap();
        }
        store.freeze("A001", "S1").unwrap();

        let engine = DetectionEngine::new(DetectionConfig::default()).unwrap();
        let batch = TestBatch::new("T1", store.frozen_sessions("T1"));
        let report = engine.run(&batch).unwrap();

        // Six identical answers in a row
        assert_eq!(report.flags_of_kind(FlagKind::SequentialPattern).count(), 1);
        assert!(report.flags.iter().all(|f| f.status == FlagStatus::Open));
    }
}
