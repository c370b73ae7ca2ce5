//! Response events and candidate sessions.
//!
//! A [`CandidateSession`] is the ordered event stream of one candidate in one
//! test. Sessions are appended to while the exam runs and frozen at
//! submission; detectors only ever see frozen sessions.

use crate::error::{RecordContext, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Section used when events carry no section label.
pub const DEFAULT_SECTION: &str = "all";

/// One answer submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub candidate_id: String,
    pub session_id: String,
    pub item_id: String,
    /// Selected option label; `None` when the item was left blank.
    #[serde(default)]
    pub choice: Option<String>,
    pub is_correct: bool,
    /// Monotonic event time within the session.
    pub timestamp_ms: u64,
    /// Time spent on the item.
    pub response_time_ms: u64,
    /// 0 for the first answer, +1 per change.
    #[serde(default)]
    pub revision_index: u32,
    /// IRT b-parameter (or equivalent).
    #[serde(default)]
    pub item_difficulty: f64,
    /// Scored section, for person-fit grouping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl ResponseEvent {
    /// Build a first-attempt event.
    pub fn new(
        candidate_id: &str,
        session_id: &str,
        item_id: &str,
        choice: &str,
        is_correct: bool,
        timestamp_ms: u64,
        response_time_ms: u64,
    ) -> Self {
        Self {
            candidate_id: candidate_id.to_string(),
            session_id: session_id.to_string(),
            item_id: item_id.to_string(),
            choice: Some(choice.to_string()),
            is_correct,
            timestamp_ms,
            response_time_ms,
            revision_index: 0,
            item_difficulty: 0.0,
            section: None,
        }
    }

    pub fn with_revision(mut self, revision_index: u32) -> Self {
        self.revision_index = revision_index;
        self
    }

    pub fn with_difficulty(mut self, difficulty: f64) -> Self {
        self.item_difficulty = difficulty;
        self
    }

    pub fn with_section(mut self, section: &str) -> Self {
        self.section = Some(section.to_string());
        self
    }

    /// Mark the item as left blank.
    pub fn omitted(mut self) -> Self {
        self.choice = None;
        self.is_correct = false;
        self
    }

    pub fn is_omitted(&self) -> bool {
        self.choice.is_none()
    }

    pub fn section(&self) -> &str {
        self.section.as_deref().unwrap_or(DEFAULT_SECTION)
    }

    pub(crate) fn context(&self) -> RecordContext {
        RecordContext::item(&self.candidate_id, &self.session_id, &self.item_id)
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Open,
    Frozen,
}

/// Ordered event stream for one candidate in one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSession {
    pub test_id: String,
    pub candidate_id: String,
    pub session_id: String,
    pub events: Vec<ResponseEvent>,
    pub state: SessionState,
}

impl CandidateSession {
    /// Create an open, empty session.
    pub fn new(test_id: &str, candidate_id: &str, session_id: &str) -> Self {
        Self {
            test_id: test_id.to_string(),
            candidate_id: candidate_id.to_string(),
            session_id: session_id.to_string(),
            events: Vec::new(),
            state: SessionState::Open,
        }
    }

    /// Create a frozen session from already-ordered events.
    pub fn frozen(
        test_id: &str,
        candidate_id: &str,
        session_id: &str,
        events: Vec<ResponseEvent>,
    ) -> Self {
        Self {
            test_id: test_id.to_string(),
            candidate_id: candidate_id.to_string(),
            session_id: session_id.to_string(),
            events,
            state: SessionState::Frozen,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.state == SessionState::Frozen
    }

    pub fn context(&self) -> RecordContext {
        RecordContext::session(&self.candidate_id, &self.session_id)
    }

    /// Item ids in first-presentation order.
    pub fn item_order(&self) -> Vec<&str> {
        let mut seen = HashMap::new();
        let mut order = Vec::new();
        for event in &self.events {
            if seen.insert(event.item_id.as_str(), ()).is_none() {
                order.push(event.item_id.as_str());
            }
        }
        order
    }

    /// Final (highest revision) answer per item, in presentation order.
    pub fn final_answers(&self) -> Vec<&ResponseEvent> {
        let mut latest: HashMap<&str, &ResponseEvent> = HashMap::new();
        for event in &self.events {
            let entry = latest.entry(event.item_id.as_str()).or_insert(event);
            if event.revision_index >= entry.revision_index {
                *entry = event;
            }
        }
        self.item_order()
            .into_iter()
            .filter_map(|item| latest.get(item).copied())
            .collect()
    }

    /// First-attempt events, one per item.
    pub fn first_attempts(&self) -> Vec<&ResponseEvent> {
        self.events
            .iter()
            .filter(|e| e.revision_index == 0)
            .collect()
    }

    /// All events grouped by item, in presentation order.
    pub fn revisions_by_item(&self) -> Vec<(&str, Vec<&ResponseEvent>)> {
        let mut grouped: HashMap<&str, Vec<&ResponseEvent>> = HashMap::new();
        for event in &self.events {
            grouped.entry(event.item_id.as_str()).or_default().push(event);
        }
        self.item_order()
            .into_iter()
            .map(|item| {
                let mut events = grouped.remove(item).unwrap_or_default();
                events.sort_by_key(|e| e.revision_index);
                (item, events)
            })
            .collect()
    }

    /// Number of distinct items attempted.
    pub fn item_count(&self) -> usize {
        self.item_order().len()
    }

    /// Number of items whose final answer is correct.
    pub fn final_score(&self) -> usize {
        self.final_answers().iter().filter(|e| e.is_correct).count()
    }

    /// Timestamp of the last event, if any.
    pub fn last_timestamp_ms(&self) -> Option<u64> {
        self.events.iter().map(|e| e.timestamp_ms).max()
    }
}

/// Check identifiers, ordering and revision numbering of a session.
///
/// Events must belong to the session, carry finite numbers, have
/// non-decreasing timestamps, and number revisions of each item 0, 1, 2, ...
pub fn validate_session(session: &CandidateSession) -> Result<(), ValidationError> {
    let ctx = session.context();
    if session.candidate_id.is_empty() {
        return Err(ValidationError::MissingField {
            field: "candidate_id",
            context: ctx,
        });
    }
    if session.session_id.is_empty() {
        return Err(ValidationError::MissingField {
            field: "session_id",
            context: ctx,
        });
    }

    let mut previous_ms: Option<u64> = None;
    let mut next_revision: HashMap<&str, u32> = HashMap::new();

    for event in &session.events {
        check_event_fields(event)?;

        if event.candidate_id != session.candidate_id || event.session_id != session.session_id
        {
            return Err(ValidationError::ForeignEvent {
                context: ctx,
                found_candidate: event.candidate_id.clone(),
                found_session: event.session_id.clone(),
            });
        }

        if let Some(prev) = previous_ms {
            if event.timestamp_ms < prev {
                return Err(ValidationError::OutOfOrder {
                    context: event.context(),
                    timestamp_ms: event.timestamp_ms,
                    previous_ms: prev,
                });
            }
        }
        previous_ms = Some(event.timestamp_ms);

        let expected = next_revision.entry(event.item_id.as_str()).or_insert(0);
        if event.revision_index != *expected {
            return Err(ValidationError::RevisionGap {
                context: event.context(),
                expected: *expected,
                actual: event.revision_index,
            });
        }
        *expected += 1;
    }

    Ok(())
}

/// Per-event field checks shared with the store.
pub(crate) fn check_event_fields(event: &ResponseEvent) -> Result<(), ValidationError> {
    if event.item_id.is_empty() {
        return Err(ValidationError::MissingField {
            field: "item_id",
            context: event.context(),
        });
    }
    if let Some(choice) = &event.choice {
        if choice.is_empty() {
            return Err(ValidationError::MissingField {
                field: "choice",
                context: event.context(),
            });
        }
    }
    if !event.item_difficulty.is_finite() {
        return Err(ValidationError::InvalidNumber {
            field: "item_difficulty",
            context: event.context(),
            value: event.item_difficulty,
        });
    }
    Ok(())
}
