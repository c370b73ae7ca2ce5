// ExamGuard Testdata - Error types
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for cohort generation and scenarios.

use thiserror::Error;

/// Result type for testdata operations.
pub type Result<T> = std::result::Result<T, TestdataError>;

/// Errors raised while generating cohorts or running scenarios.
#[derive(Debug, Error)]
pub enum TestdataError {
    /// Generator parameters out of range.
    #[error("Invalid cohort config: {0}")]
    InvalidConfig(String),

    /// Injection names a candidate the cohort does not contain.
    #[error("Unknown candidate: {0}")]
    UnknownCandidate(String),

    /// Injection reaches past the last item.
    #[error("Item range {start}..{end} exceeds {items} items")]
    ItemOutOfRange {
        start: usize,
        end: usize,
        items: usize,
    },

    /// Engine rejected the generated batch.
    #[error("Engine error: {0}")]
    Engine(#[from] examguard::EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
