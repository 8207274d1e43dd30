//! Voice activity detection with hysteresis.
//!
//! Consumes 16kHz frames, re-chunks them into 512-sample (32ms) windows
//! and feeds each through the neural VAD. Two consecutive speech windows
//! are required to flip into speech (debounce against impulse noise);
//! accumulated silence beyond the configured duration flips back out.
//!
//! Model-load failure is non-fatal: the detector fails open and reports
//! speech unconditionally, leaving end-of-utterance to the fail-safe
//! timeout.

#[cfg(feature = "onnx")]
mod silero;

#[cfg(feature = "onnx")]
pub use silero::SileroVad;

use crate::config::VadConfig;
use crate::error::Result;
use tracing::{debug, info, warn};

/// Window length fed to the model: 512 samples = 32ms at 16kHz.
pub const VAD_WINDOW_SAMPLES: usize = 512;
/// Duration of one window in milliseconds.
const WINDOW_MS: u32 = 32;
/// Consecutive speech windows required to enter the speaking state.
const SPEECH_DEBOUNCE_WINDOWS: u32 = 2;

/// Speech-probability model behind the detector.
///
/// Implementations own their weights and internal state; `predict`
/// receives one normalized 512-sample window.
pub trait VadModel: Send {
    /// Speech probability in [0, 1] for one window.
    fn predict(&mut self, window: &[f32]) -> Result<f32>;

    /// Clear recurrent state, if any.
    fn reset(&mut self) {}
}

/// Stateful detector over a [`VadModel`].
pub struct VadEngine {
    model: Option<Box<dyn VadModel>>,
    threshold: f32,
    min_silence_ms: u32,
    is_speaking: bool,
    speech_windows: u32,
    silence_windows: u32,
    pending: Vec<i16>,
}

impl VadEngine {
    /// Build the detector with the backend selected at compile time.
    ///
    /// Load failure degrades to fail-open rather than erroring.
    #[must_use]
    pub fn new(config: &VadConfig) -> Self {
        let model: Option<Box<dyn VadModel>> = {
            #[cfg(feature = "onnx")]
            {
                match SileroVad::load(&config.model_path) {
                    Ok(model) => Some(Box::new(model)),
                    Err(e) => {
                        warn!("failed to load VAD model: {e} — failing open");
                        None
                    }
                }
            }
            #[cfg(not(feature = "onnx"))]
            {
                warn!("no VAD backend compiled in (onnx feature disabled) — failing open");
                None
            }
        };
        Self::with_model(config, model)
    }

    /// Build the detector around an explicit model (or none, failing open).
    #[must_use]
    pub fn with_model(config: &VadConfig, model: Option<Box<dyn VadModel>>) -> Self {
        info!(
            threshold = config.threshold,
            min_silence_ms = config.min_silence_duration_ms,
            speech_pad_ms = config.speech_pad_ms,
            model_loaded = model.is_some(),
            "VAD initialized"
        );
        Self {
            model,
            threshold: config.threshold,
            min_silence_ms: config.min_silence_duration_ms,
            is_speaking: false,
            speech_windows: 0,
            silence_windows: 0,
            pending: Vec::with_capacity(VAD_WINDOW_SAMPLES * 4),
        }
    }

    /// Whether a model is backing the detector.
    #[must_use]
    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Feed one 16kHz frame; returns whether the detector is currently
    /// in speech (including the lead-out silence tolerance).
    pub fn is_speech(&mut self, frame: &[i16]) -> bool {
        let Some(model) = self.model.as_mut() else {
            // Fail-safe: assume speech when the model is missing.
            return true;
        };

        self.pending.extend_from_slice(frame);

        while self.pending.len() >= VAD_WINDOW_SAMPLES {
            let window: Vec<f32> = self
                .pending
                .drain(..VAD_WINDOW_SAMPLES)
                .map(|s| f32::from(s) / 32768.0)
                .collect();

            let prob = match model.predict(&window) {
                Ok(p) => p,
                Err(e) => {
                    warn!("VAD inference error: {e} — failing open");
                    return true;
                }
            };

            if prob > self.threshold {
                self.speech_windows += 1;
                self.silence_windows = 0;
                if !self.is_speaking && self.speech_windows >= SPEECH_DEBOUNCE_WINDOWS {
                    self.is_speaking = true;
                    debug!("VAD: speech started");
                }
            } else {
                self.silence_windows += 1;
                self.speech_windows = 0;
                let silence_ms = self.silence_windows * WINDOW_MS;
                if self.is_speaking && silence_ms > self.min_silence_ms {
                    self.is_speaking = false;
                    debug!(silence_ms, "VAD: speech ended");
                }
            }
        }

        self.is_speaking
    }

    /// Clear all detector state, including the model's recurrent state.
    pub fn reset(&mut self) {
        self.is_speaking = false;
        self.speech_windows = 0;
        self.silence_windows = 0;
        self.pending.clear();
        if let Some(model) = self.model.as_mut() {
            model.reset();
        }
    }
}
