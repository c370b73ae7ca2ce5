//! Error types for ExamGuard
//!
//! This module defines all error types used throughout the library.
//! Insufficient data and degenerate statistics are not errors: detectors
//! report those as [`crate::flag::Abstention`] records instead.

use crate::flag::FlagStatus;
use thiserror::Error;

/// Result type alias for ExamGuard operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for ExamGuard operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Input record failed validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Response log store lifecycle violation
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Flag status change not allowed by the lifecycle
    #[error("Illegal status transition: {from:?} -> {to:?}")]
    StatusTransition { from: FlagStatus, to: FlagStatus },

    /// Report (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Location of a bad record inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordContext {
    pub candidate_id: String,
    pub session_id: String,
    pub item_id: Option<String>,
}

impl RecordContext {
    pub fn session(candidate_id: &str, session_id: &str) -> Self {
        Self {
            candidate_id: candidate_id.to_string(),
            session_id: session_id.to_string(),
            item_id: None,
        }
    }

    pub fn item(candidate_id: &str, session_id: &str, item_id: &str) -> Self {
        Self {
            candidate_id: candidate_id.to_string(),
            session_id: session_id.to_string(),
            item_id: Some(item_id.to_string()),
        }
    }
}

impl std::fmt::Display for RecordContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "candidate={} session={}",
            self.candidate_id, self.session_id
        )?;
        if let Some(item) = &self.item_id {
            write!(f, " item={}", item)?;
        }
        Ok(())
    }
}

/// Errors in response events and sessions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Identifier empty
    #[error("Missing {field} ({context})")]
    MissingField {
        field: &'static str,
        context: RecordContext,
    },

    /// Event belongs to another candidate or session
    #[error("Event does not belong to session ({context}): found candidate={found_candidate} session={found_session}")]
    ForeignEvent {
        context: RecordContext,
        found_candidate: String,
        found_session: String,
    },

    /// Event timestamp went backwards
    #[error("Out-of-order event ({context}): timestamp {timestamp_ms} before {previous_ms}")]
    OutOfOrder {
        context: RecordContext,
        timestamp_ms: u64,
        previous_ms: u64,
    },

    /// Revision index is not the next index for the item
    #[error("Bad revision index ({context}): expected {expected}, got {actual}")]
    RevisionGap {
        context: RecordContext,
        expected: u32,
        actual: u32,
    },

    /// Non-finite numeric field
    #[error("Invalid {field} ({context}): {value}")]
    InvalidNumber {
        field: &'static str,
        context: RecordContext,
        value: f64,
    },

    /// Session still open
    #[error("Session not frozen ({context})")]
    NotFrozen { context: RecordContext },

    /// Session belongs to another test
    #[error("Session ({context}) belongs to test {found}, expected {expected}")]
    WrongTest {
        context: RecordContext,
        expected: String,
        found: String,
    },

    /// Same candidate appears twice in a batch
    #[error("Duplicate candidate in batch: {0}")]
    DuplicateCandidate(String),
}

/// Errors in detection configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Value outside its allowed range
    #[error("{field} out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Value below the structural minimum
    #[error("{field} too small: {value} (minimum {min})")]
    TooSmall {
        field: &'static str,
        value: usize,
        min: usize,
    },

    /// Configuration could not be read or parsed
    #[error("Cannot load configuration: {0}")]
    Load(String),
}

/// Errors raised by the response log store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Session never opened
    #[error("Unknown session ({0})")]
    UnknownSession(RecordContext),

    /// Session opened twice
    #[error("Session already exists ({0})")]
    SessionExists(RecordContext),

    /// Append after submission
    #[error("Session is frozen ({0})")]
    Frozen(RecordContext),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = EngineError::Validation(ValidationError::OutOfOrder {
            context: RecordContext::item("A002", "S1", "Q7"),
            timestamp_ms: 1000,
            previous_ms: 2000,
        });
        let msg = format!("{}", err);
        assert!(msg.contains("A002"));
        assert!(msg.contains("Q7"));
        assert!(msg.contains("1000"));
    }

    #[test]
    fn test_error_conversion() {
        let config_err = ConfigError::Load("bad json".to_string());
        let err: EngineError = config_err.into();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_context_without_item() {
        let ctx = RecordContext::session("A001", "S9");
        assert_eq!(ctx.to_string(), "candidate=A001 session=S9");
    }
}
