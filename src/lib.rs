//! Vesper: realtime, local-first voice assistant pipeline.
//!
//! Converts a continuous microphone stream into discrete conversational
//! turns: wake word → speech capture → transcription → streamed LLM
//! response, orchestrated by a finite-state machine.
//!
//! # Architecture
//!
//! A hardware callback thread owns the capture device and DSP (resample,
//! denoise, normalize), handing uniform 16kHz frames to a cooperative
//! event loop over a bounded queue:
//! - **Audio source**: capture + enhancement via `cpal`
//! - **Wake-word engine**: per-keyword scoring over 80ms frames
//! - **VAD**: 32ms-window speech classification with hysteresis
//! - **STT**: utterance buffering and whisper-family transcription
//! - **LLM client**: SSE token streaming from a llama.cpp-style server
//! - **FSM + router**: validates transitions, dispatches typed events
//!
//! Neural models are black boxes behind the `WakeModel`, `VadModel` and
//! `SttModel` traits; concrete backends are selected by cargo feature
//! (`onnx`, `whisper`) and degrade gracefully when absent.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod fsm;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod router;
pub mod session;
pub mod stt;
pub mod vad;
pub mod wakeword;
