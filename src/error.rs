//! Error types for the assistant pipeline.

/// Top-level error type for the voice assistant.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Audio device or capture pipeline error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Wake-word model or inference error.
    #[error("wake-word error: {0}")]
    WakeWord(String),

    /// Voice activity detection error.
    #[error("VAD error: {0}")]
    Vad(String),

    /// Speech-to-text transcription error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Language model request or streaming error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// An in-flight operation was cancelled (LLM generation, shutdown).
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AssistantError>;
