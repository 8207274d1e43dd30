//! Conversational finite-state machine.
//!
//! Owns the current state and the active session. Transitions are only
//! ever applied from the event-loop thread; `handle_event` validates and
//! applies the transition first, then dispatches the event through the
//! router so registered handlers observe the post-transition state.

use crate::events::{Event, EventKind};
use crate::router::EventRouter;
use crate::session::SessionManager;
use tracing::info;

/// Conversational state. Exactly one is active at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the wake word.
    Idle,
    /// Capturing an utterance.
    Listening,
    /// Running LLM inference; audio capture is suspended.
    Thinking,
    /// Playing back a synthesized response.
    Speaking,
    /// Transient error state; drains straight back to idle.
    Error,
}

/// The state machine plus the session it owns.
pub struct Fsm {
    state: State,
    sessions: SessionManager,
}

impl Fsm {
    /// Create a machine in IDLE with no active session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            sessions: SessionManager::new(),
        }
    }

    /// Begin a new session and force IDLE.
    pub fn start(&mut self) {
        self.sessions.start_new_session();
        self.state = State::Idle;
        info!(state = ?self.state, "FSM started");
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// The session manager.
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Mutable access to the session manager.
    pub fn sessions_mut(&mut self) -> &mut SessionManager {
        &mut self.sessions
    }

    /// Apply a transition. A self-transition is a no-op.
    pub fn transition(&mut self, new_state: State) {
        if self.state == new_state {
            return;
        }
        let old_state = self.state;
        self.state = new_state;
        info!(from = ?old_state, to = ?new_state, "FSM transition");
    }

    /// Validate and apply the transition for `event`, then dispatch it
    /// through the router. Events with no transition defined for the
    /// current state leave the state untouched but are still dispatched.
    pub async fn handle_event(&mut self, router: &EventRouter, event: &Event) {
        match (self.state, event.kind()) {
            (State::Idle, EventKind::WakewordDetected) => self.transition(State::Listening),
            (State::Listening, EventKind::TranscriptionFinal) => self.transition(State::Thinking),
            (State::Listening, EventKind::Timeout) => self.transition(State::Idle),
            (State::Thinking, EventKind::TtsStart) => self.transition(State::Speaking),
            (State::Speaking, EventKind::TtsComplete) => self.transition(State::Idle),
            (_, EventKind::ErrorOccurred) => {
                // Error is transient: pass through it and settle in idle.
                self.transition(State::Error);
                self.transition(State::Idle);
            }
            _ => {}
        }

        router.dispatch(event.clone()).await;
    }
}

impl Default for Fsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> Fsm {
        let mut fsm = Fsm::new();
        fsm.start();
        fsm
    }

    #[tokio::test]
    async fn starts_in_idle() {
        let fsm = started();
        assert_eq!(fsm.state(), State::Idle);
        assert!(fsm.sessions().current().is_some());
    }

    #[tokio::test]
    async fn wakeword_enters_listening() {
        let router = EventRouter::new();
        let mut fsm = started();
        fsm.handle_event(
            &router,
            &Event::WakewordDetected {
                keyword: "hey_jarvis".into(),
                score: 0.8,
            },
        )
        .await;
        assert_eq!(fsm.state(), State::Listening);
    }

    #[tokio::test]
    async fn transcription_enters_thinking() {
        let router = EventRouter::new();
        let mut fsm = started();
        fsm.transition(State::Listening);
        fsm.handle_event(
            &router,
            &Event::TranscriptionFinal {
                text: "what time is it".into(),
            },
        )
        .await;
        assert_eq!(fsm.state(), State::Thinking);
    }

    #[tokio::test]
    async fn listening_timeout_returns_to_idle() {
        let router = EventRouter::new();
        let mut fsm = started();
        fsm.transition(State::Listening);
        fsm.handle_event(&router, &Event::Timeout).await;
        assert_eq!(fsm.state(), State::Idle);
    }

    #[tokio::test]
    async fn wakeword_is_ignored_outside_idle() {
        let router = EventRouter::new();
        let mut fsm = started();
        fsm.transition(State::Thinking);
        fsm.handle_event(
            &router,
            &Event::WakewordDetected {
                keyword: "hey_jarvis".into(),
                score: 0.9,
            },
        )
        .await;
        assert_eq!(fsm.state(), State::Thinking);
    }

    #[tokio::test]
    async fn tts_cycle_reaches_idle() {
        let router = EventRouter::new();
        let mut fsm = started();
        fsm.transition(State::Thinking);
        fsm.handle_event(&router, &Event::TtsStart).await;
        assert_eq!(fsm.state(), State::Speaking);
        fsm.handle_event(&router, &Event::TtsComplete).await;
        assert_eq!(fsm.state(), State::Idle);
    }

    #[tokio::test]
    async fn error_settles_in_idle_from_any_state() {
        let router = EventRouter::new();
        for start_state in [State::Idle, State::Listening, State::Thinking, State::Speaking] {
            let mut fsm = started();
            fsm.transition(start_state);
            fsm.handle_event(
                &router,
                &Event::ErrorOccurred {
                    message: "device lost".into(),
                },
            )
            .await;
            assert_eq!(fsm.state(), State::Idle);
        }
    }

    #[tokio::test]
    async fn start_resets_session() {
        let mut fsm = started();
        fsm.sessions_mut().add_turn("q".into(), "a".into());
        assert_eq!(fsm.sessions().history(0).len(), 1);
        fsm.transition(State::Listening);
        fsm.start();
        assert_eq!(fsm.state(), State::Idle);
        assert_eq!(fsm.sessions().history(0).len(), 0);
    }
}
