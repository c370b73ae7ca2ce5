// ExamGuard Testdata - Synthetic cohort generator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # ExamGuard Testdata
//!
//! Synthetic exam cohorts for exercising the ExamGuard detection engine.
//!
//! - **Cohort generation**: IRT-driven answers, log-normal response times
//! - **Behaviour injection**: rapid guessing, answer runs, cycles, flip-flops, copying
//! - **Scenarios**: JSON recipes with expected flags per candidate
//!
//! ## Quick Start
//!
//! ```rust
//! use examguard::{DetectionConfig, DetectionEngine, FlagKind};
//! use examguard_testdata::{generate_cohort, CohortConfig, Injection};
//!
//! let config = CohortConfig::new().with_seed(42).with_candidates(6).with_items(30);
//! let mut cohort = generate_cohort(&config).unwrap();
//!
//! Injection::AnswerRun {
//!     candidate_id: "C0002".to_string(),
//!     start_item: 5,
//!     length: 8,
//!     choice: "D".to_string(),
//! }
//! .apply(&mut cohort)
//! .unwrap();
//!
//! let engine = DetectionEngine::new(DetectionConfig::default()).unwrap();
//! let report = engine.run(&cohort.to_batch()).unwrap();
//! assert!(report
//!     .flags_for("C0002")
//!     .any(|f| f.kind == FlagKind::SequentialPattern));
//! ```
//!
//! ## Scenario Files
//!
//! The `scenarios/` directory holds JSON scenarios loadable with
//! [`Scenario::from_json_file`].

pub mod error;
pub mod generator;
pub mod injections;
pub mod scenario;

// Re-exports for convenience
pub use error::{Result, TestdataError};
pub use generator::{candidate_id, generate_cohort, item_id, Cohort, CohortConfig, SESSION_ID};
pub use injections::Injection;
pub use scenario::{check, predefined_scenarios, Expectation, Scenario, ScenarioResult};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
