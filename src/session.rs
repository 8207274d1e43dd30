//! Conversation sessions and their history.
//!
//! A session lives for the lifetime of the process. History is append-only
//! until explicitly cleared; truncation to the configured turn budget
//! happens at prompt-build time, never on storage.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One conversation: a stable id, a per-wake correlation id and the
/// ordered (user query, assistant response) turns.
#[derive(Debug, Clone)]
pub struct Session {
    session_id: String,
    correlation_id: String,
    started_at: DateTime<Utc>,
    history: Vec<(String, String)>,
}

impl Session {
    /// Start a fresh session with new ids.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            correlation_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Stable identifier of this session.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Correlation id of the current turn.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// When this session was created.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Renew the correlation id (called at each wake-word detection).
    pub fn fresh_correlation_id(&mut self) -> &str {
        self.correlation_id = Uuid::new_v4().to_string();
        &self.correlation_id
    }

    /// Append a completed turn.
    pub fn add_turn(&mut self, user_query: String, assistant_response: String) {
        self.history.push((user_query, assistant_response));
    }

    /// The most recent `max_turns` turns, oldest first. `0` returns the
    /// full history.
    #[must_use]
    pub fn history(&self, max_turns: usize) -> &[(String, String)] {
        if max_turns == 0 || self.history.len() <= max_turns {
            return &self.history;
        }
        &self.history[self.history.len() - max_turns..]
    }

    /// Number of completed turns.
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.history.len()
    }

    /// Drop all stored turns.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of the single active session.
#[derive(Debug, Default)]
pub struct SessionManager {
    current: Option<Session>,
}

impl SessionManager {
    /// Create a manager with no active session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any active session with a fresh one.
    pub fn start_new_session(&mut self) -> &Session {
        self.current.insert(Session::new())
    }

    /// The active session, if any.
    #[must_use]
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Mutable access to the active session, if any.
    pub fn current_mut(&mut self) -> Option<&mut Session> {
        self.current.as_mut()
    }

    /// Append a turn to the active session; no-op without one.
    pub fn add_turn(&mut self, user_query: String, assistant_response: String) {
        if let Some(session) = self.current.as_mut() {
            session.add_turn(user_query, assistant_response);
        }
    }

    /// History of the active session (see [`Session::history`]).
    #[must_use]
    pub fn history(&self, max_turns: usize) -> &[(String, String)] {
        match self.current.as_ref() {
            Some(session) => session.history(max_turns),
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_correlation_id_changes() {
        let mut session = Session::new();
        let before = session.correlation_id().to_owned();
        session.fresh_correlation_id();
        assert_ne!(session.correlation_id(), before);
        // The session id is stable across wakes.
        let sid = session.session_id().to_owned();
        session.fresh_correlation_id();
        assert_eq!(session.session_id(), sid);
    }

    #[test]
    fn history_length_matches_turn_count() {
        let mut session = Session::new();
        for i in 0..4 {
            session.add_turn(format!("q{i}"), format!("a{i}"));
        }
        assert_eq!(session.turn_count(), 4);
        assert_eq!(session.history(0).len(), 4);
    }

    #[test]
    fn history_truncates_to_most_recent_turns() {
        let mut session = Session::new();
        for i in 0..5 {
            session.add_turn(format!("q{i}"), format!("a{i}"));
        }
        let recent = session.history(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].0, "q3");
        assert_eq!(recent[1].0, "q4");
        // Storage is untouched by the truncating view.
        assert_eq!(session.turn_count(), 5);
    }

    #[test]
    fn manager_replaces_session() {
        let mut manager = SessionManager::new();
        assert!(manager.current().is_none());
        let first = manager.start_new_session().session_id().to_owned();
        manager.add_turn("hello".into(), "hi".into());
        let second = manager.start_new_session().session_id().to_owned();
        assert_ne!(first, second);
        assert_eq!(manager.history(0).len(), 0);
    }
}
