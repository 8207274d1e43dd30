//! Typed events flowing between pipeline stages and the orchestrator.
//!
//! Engines surface detections and transcripts as values rather than
//! dynamic callback slots; the event loop turns them into [`Event`]s
//! and routes them through the state machine and the event router.

/// Discriminant of an [`Event`], used for router registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    WakewordDetected,
    SpeechStart,
    SpeechEnd,
    TranscriptionFinal,
    LlmToken,
    LlmComplete,
    TtsStart,
    TtsComplete,
    ErrorOccurred,
    Timeout,
    /// Barge-in. Enumerated for forward compatibility; no handler is
    /// wired up by the orchestrator.
    Interrupt,
}

/// An event with its payload.
#[derive(Debug, Clone)]
pub enum Event {
    /// A wake word crossed the detection threshold.
    WakewordDetected { keyword: String, score: f32 },
    /// The VAD flipped from silence to speech.
    SpeechStart,
    /// The VAD flipped from speech to silence.
    SpeechEnd,
    /// The STT engine produced the final transcription of an utterance.
    TranscriptionFinal { text: String },
    /// First streamed LLM token of a turn (latency marker).
    LlmToken { token: String },
    /// LLM generation finished; carries the full (possibly partial on
    /// cancellation) response text.
    LlmComplete { response: String },
    /// Speech synthesis started.
    TtsStart,
    /// Speech synthesis finished.
    TtsComplete,
    /// A component reported a non-fatal error.
    ErrorOccurred { message: String },
    /// The listening fail-safe expired without a transcription.
    Timeout,
    /// Barge-in request (unhandled).
    Interrupt,
}

impl Event {
    /// The kind used for router lookup.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::WakewordDetected { .. } => EventKind::WakewordDetected,
            Event::SpeechStart => EventKind::SpeechStart,
            Event::SpeechEnd => EventKind::SpeechEnd,
            Event::TranscriptionFinal { .. } => EventKind::TranscriptionFinal,
            Event::LlmToken { .. } => EventKind::LlmToken,
            Event::LlmComplete { .. } => EventKind::LlmComplete,
            Event::TtsStart => EventKind::TtsStart,
            Event::TtsComplete => EventKind::TtsComplete,
            Event::ErrorOccurred { .. } => EventKind::ErrorOccurred,
            Event::Timeout => EventKind::Timeout,
            Event::Interrupt => EventKind::Interrupt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let event = Event::WakewordDetected {
            keyword: "hey_jarvis".into(),
            score: 0.9,
        };
        assert_eq!(event.kind(), EventKind::WakewordDetected);
        assert_eq!(
            Event::TranscriptionFinal { text: "hi".into() }.kind(),
            EventKind::TranscriptionFinal
        );
        assert_eq!(Event::Timeout.kind(), EventKind::Timeout);
    }
}
