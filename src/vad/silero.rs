//! Silero VAD backend via ONNX Runtime.
//!
//! Processes 512-sample windows at 16kHz and returns speech probability,
//! carrying the model's LSTM hidden state (h, c) across calls.

use crate::error::{AssistantError, Result};
use crate::vad::{VAD_WINDOW_SAMPLES, VadModel};
use ort::session::Session;
use std::path::Path;
use tracing::info;

/// Sample rate the model was trained for.
const SAMPLE_RATE: i64 = 16_000;
/// LSTM state shape is [2, 1, 128].
const STATE_SIZE: usize = 2 * 128;

/// Silero VAD session plus recurrent state.
pub struct SileroVad {
    session: Session,
    h: Vec<f32>,
    c: Vec<f32>,
}

impl SileroVad {
    /// Load the model from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or the session cannot be
    /// created.
    pub fn load(model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(AssistantError::Vad(format!(
                "VAD model not found: {}",
                model_path.display()
            )));
        }

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.with_inter_threads(1))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| AssistantError::Vad(format!("cannot load VAD model: {e}")))?;

        info!("Silero VAD loaded from {}", model_path.display());
        Ok(Self {
            session,
            h: vec![0.0f32; STATE_SIZE],
            c: vec![0.0f32; STATE_SIZE],
        })
    }
}

impl VadModel for SileroVad {
    fn predict(&mut self, window: &[f32]) -> Result<f32> {
        if window.len() != VAD_WINDOW_SAMPLES {
            return Err(AssistantError::Vad(format!(
                "expected {VAD_WINDOW_SAMPLES}-sample window, got {}",
                window.len()
            )));
        }

        let input = ort::value::Value::from_array(([1, VAD_WINDOW_SAMPLES], window.to_vec()))
            .map_err(|e| AssistantError::Vad(format!("input tensor: {e}")))?;
        let sr = ort::value::Value::from_array(([1], vec![SAMPLE_RATE]))
            .map_err(|e| AssistantError::Vad(format!("sr tensor: {e}")))?;
        let h = ort::value::Value::from_array(([2, 1, 128], self.h.clone()))
            .map_err(|e| AssistantError::Vad(format!("h tensor: {e}")))?;
        let c = ort::value::Value::from_array(([2, 1, 128], self.c.clone()))
            .map_err(|e| AssistantError::Vad(format!("c tensor: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input" => input,
                "sr" => sr,
                "h" => h,
                "c" => c,
            ])
            .map_err(|e| AssistantError::Vad(format!("inference: {e}")))?;

        // Output 0: speech probability; outputs 1/2: next h/c state.
        let prob = {
            let (_shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| AssistantError::Vad(format!("extract probability: {e}")))?;
            *data
                .first()
                .ok_or_else(|| AssistantError::Vad("empty probability output".into()))?
        };
        {
            let (_shape, data) = outputs[1]
                .try_extract_tensor::<f32>()
                .map_err(|e| AssistantError::Vad(format!("extract h: {e}")))?;
            self.h = data.to_vec();
        }
        {
            let (_shape, data) = outputs[2]
                .try_extract_tensor::<f32>()
                .map_err(|e| AssistantError::Vad(format!("extract c: {e}")))?;
            self.c = data.to_vec();
        }

        Ok(prob)
    }

    fn reset(&mut self) {
        self.h = vec![0.0f32; STATE_SIZE];
        self.c = vec![0.0f32; STATE_SIZE];
    }
}
