//! Response log store.
//!
//! Holds the ordered, append-only event stream of every candidate session.
//! An external producer opens sessions, appends events as they arrive and
//! freezes each session at submission. Frozen sessions are handed to the
//! detection engine as a batch.

use crate::error::{RecordContext, StoreError, ValidationError};
use crate::response::{check_event_fields, CandidateSession, ResponseEvent, SessionState};
use std::collections::{BTreeMap, HashMap};

type SessionKey = (String, String);

/// In-memory store of candidate sessions keyed by (candidate, session).
#[derive(Debug, Default)]
pub struct ResponseLogStore {
    sessions: BTreeMap<SessionKey, CandidateSession>,
    /// Next expected revision index per item of each open session.
    next_revision: HashMap<SessionKey, HashMap<String, u32>>,
}

impl ResponseLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session.
    pub fn open_session(
        &mut self,
        test_id: &str,
        candidate_id: &str,
        session_id: &str,
    ) -> crate::Result<()> {
        let key = (candidate_id.to_string(), session_id.to_string());
        if self.sessions.contains_key(&key) {
            return Err(
                StoreError::SessionExists(RecordContext::session(candidate_id, session_id)).into(),
            );
        }
        if candidate_id.is_empty() || session_id.is_empty() {
            return Err(ValidationError::MissingField {
                field: if candidate_id.is_empty() {
                    "candidate_id"
                } else {
                    "session_id"
                },
                context: RecordContext::session(candidate_id, session_id),
            }
            .into());
        }
        log::debug!(
            "Opened session: test={}, candidate={}, session={}",
            test_id,
            candidate_id,
            session_id
        );
        self.sessions.insert(
            key,
            CandidateSession::new(test_id, candidate_id, session_id),
        );
        Ok(())
    }

    /// Append an event to its open session.
    pub fn append(&mut self, event: ResponseEvent) -> crate::Result<()> {
        check_event_fields(&event)?;

        let key = (event.candidate_id.clone(), event.session_id.clone());
        let session = self.sessions.get_mut(&key).ok_or_else(|| {
            StoreError::UnknownSession(RecordContext::session(
                &event.candidate_id,
                &event.session_id,
            ))
        })?;

        if session.state == SessionState::Frozen {
            return Err(StoreError::Frozen(session.context()).into());
        }

        if let Some(prev) = session.events.last() {
            if event.timestamp_ms < prev.timestamp_ms {
                return Err(ValidationError::OutOfOrder {
                    context: event.context(),
                    timestamp_ms: event.timestamp_ms,
                    previous_ms: prev.timestamp_ms,
                }
                .into());
            }
        }

        let revisions = self.next_revision.entry(key).or_default();
        let expected = revisions.get(&event.item_id).copied().unwrap_or(0);
        if event.revision_index != expected {
            return Err(ValidationError::RevisionGap {
                context: event.context(),
                expected,
                actual: event.revision_index,
            }
            .into());
        }

        revisions.insert(event.item_id.clone(), expected + 1);
        session.events.push(event);
        Ok(())
    }

    /// Freeze a session at submission. Freezing twice is a no-op.
    pub fn freeze(&mut self, candidate_id: &str, session_id: &str) -> crate::Result<()> {
        let key = (candidate_id.to_string(), session_id.to_string());
        let session = self.sessions.get_mut(&key).ok_or_else(|| {
            StoreError::UnknownSession(RecordContext::session(candidate_id, session_id))
        })?;
        if session.state == SessionState::Open {
            session.state = SessionState::Frozen;
            self.next_revision.remove(&key);
            log::debug!(
                "Frozen session: candidate={}, session={}, events={}",
                candidate_id,
                session_id,
                session.events.len()
            );
        }
        Ok(())
    }

    /// Look up a session.
    pub fn session(&self, candidate_id: &str, session_id: &str) -> Option<&CandidateSession> {
        self.sessions
            .get(&(candidate_id.to_string(), session_id.to_string()))
    }

    /// Frozen sessions of a test, ordered by candidate then session id.
    pub fn frozen_sessions(&self, test_id: &str) -> Vec<CandidateSession> {
        self.sessions
            .values()
            .filter(|s| s.test_id == test_id && s.is_frozen())
            .cloned()
            .collect()
    }

    /// Number of sessions still open for a test.
    pub fn open_count(&self, test_id: &str) -> usize {
        self.sessions
            .values()
            .filter(|s| s.test_id == test_id && !s.is_frozen())
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
