//! Utterance buffering and final transcription.
//!
//! The engine buffers raw 16kHz i16 samples while armed. `stop_stream`
//! hands the whole utterance to the model on a blocking worker so the
//! event loop is never stalled by inference. Partial transcription is
//! reserved and not emitted by this implementation.

#[cfg(feature = "whisper")]
mod whisper;

#[cfg(feature = "whisper")]
pub use whisper::WhisperModel;

use crate::config::SttConfig;
use crate::error::Result;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Transcription model behind the engine.
///
/// `transcribe` receives the full utterance as normalized f32 samples at
/// 16kHz and returns text segments in order.
pub trait SttModel: Send {
    /// Transcribe one utterance.
    fn transcribe(&mut self, samples: &[f32], language: &str) -> Result<Vec<String>>;
}

/// Streaming facade over a blocking [`SttModel`].
pub struct SttEngine {
    model: Option<Arc<Mutex<Box<dyn SttModel>>>>,
    buffer: Vec<i16>,
    armed: bool,
    language: String,
    debug_dump: bool,
}

impl SttEngine {
    /// Build the engine with the backend selected at compile time.
    ///
    /// Model-init failure leaves the engine disarmed: `stop_stream`
    /// logs and produces nothing, and the FSM times out instead.
    #[must_use]
    pub fn new(config: &SttConfig) -> Self {
        let model: Option<Box<dyn SttModel>> = {
            #[cfg(feature = "whisper")]
            {
                match WhisperModel::load(config) {
                    Ok(m) => Some(Box::new(m)),
                    Err(e) => {
                        error!("failed to initialize STT model: {e} — transcription disabled");
                        None
                    }
                }
            }
            #[cfg(not(feature = "whisper"))]
            {
                warn!("no STT backend compiled in (whisper feature disabled) — transcription disabled");
                None
            }
        };
        Self::with_model(config, model)
    }

    /// Build the engine around an explicit model.
    #[must_use]
    pub fn with_model(config: &SttConfig, model: Option<Box<dyn SttModel>>) -> Self {
        Self {
            model: model.map(|m| Arc::new(Mutex::new(m))),
            buffer: Vec::new(),
            armed: false,
            language: config.language.clone(),
            debug_dump: config.debug_dump,
        }
    }

    /// Whether a model is backing the engine.
    #[must_use]
    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Whether the engine is currently accumulating an utterance.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Clear the buffer and begin accumulating.
    pub fn start_stream(&mut self) {
        self.buffer.clear();
        self.armed = true;
        info!("STT stream started");
    }

    /// Append one frame of samples; ignored while disarmed.
    pub fn feed_frame(&mut self, samples: &[i16]) {
        if self.armed {
            self.buffer.extend_from_slice(samples);
        }
    }

    /// Drop any buffered audio without transcribing (shutdown path).
    pub fn abort_stream(&mut self) {
        if self.armed {
            self.armed = false;
            self.buffer.clear();
            debug!("STT stream aborted");
        }
    }

    /// Stop accumulating and transcribe the buffered utterance.
    ///
    /// Returns `None` when the engine was disarmed, the buffer is empty,
    /// no model is loaded, or transcription fails. Every such case is
    /// logged and the caller falls back to the listening timeout.
    pub async fn stop_stream(&mut self) -> Option<String> {
        if !self.armed {
            return None;
        }
        self.armed = false;

        let buffer = std::mem::take(&mut self.buffer);
        info!(samples = buffer.len(), "STT stream stopped, transcribing");

        let Some(model) = self.model.clone() else {
            error!("STT model not initialized");
            return None;
        };
        if buffer.is_empty() {
            warn!("utterance buffer is empty, nothing to transcribe");
            return None;
        }

        if self.debug_dump {
            dump_debug_wav(&buffer);
        }

        let language = self.language.clone();
        let started = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || {
            let samples: Vec<f32> = buffer.iter().map(|&s| f32::from(s) / 32768.0).collect();
            let mut model = model
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            model.transcribe(&samples, &language)
        })
        .await;

        match outcome {
            Ok(Ok(segments)) => {
                let text = segments.join(" ").trim().to_owned();
                info!(
                    latency_ms = started.elapsed().as_millis() as u64,
                    text = %text,
                    "transcription complete"
                );
                Some(text)
            }
            Ok(Err(e)) => {
                error!("transcription failed: {e}");
                None
            }
            Err(e) => {
                error!("transcription task panicked: {e}");
                None
            }
        }
    }
}

/// Write the raw utterance as 16-bit 16kHz mono WAV in the working
/// directory. Failures are logged, never fatal.
fn dump_debug_wav(buffer: &[i16]) {
    let id = Uuid::new_v4().simple().to_string();
    let name = format!("debug_stt_{}.wav", &id[..8]);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let write = || -> std::result::Result<(), hound::Error> {
        let mut writer = hound::WavWriter::create(&name, spec)?;
        for &sample in buffer {
            writer.write_sample(sample)?;
        }
        writer.finalize()
    };
    match write() {
        Ok(()) => info!("debug audio dumped to {name}"),
        Err(e) => error!("failed to dump debug audio: {e}"),
    }
}
