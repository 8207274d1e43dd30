//! whisper.cpp STT backend via whisper-rs (GGML models).

use crate::config::{SttConfig, SttSampling};
use crate::error::{AssistantError, Result};
use crate::stt::SttModel;
use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Whisper context plus the decoding parameters derived from config.
pub struct WhisperModel {
    ctx: WhisperContext,
    sampling: SttSampling,
    beam_size: usize,
    n_threads: usize,
    initial_prompt: Option<String>,
}

impl WhisperModel {
    /// Load a GGML model from the configured path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or whisper.cpp refuses it.
    pub fn load(config: &SttConfig) -> Result<Self> {
        if !config.model_path.exists() {
            return Err(AssistantError::Stt(format!(
                "model not found: {}",
                config.model_path.display()
            )));
        }
        let path = config.model_path.to_str().ok_or_else(|| {
            AssistantError::Stt(format!(
                "model path is not valid UTF-8: {}",
                config.model_path.display()
            ))
        })?;

        let ctx = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| AssistantError::Stt(format!("failed to load model: {e}")))?;

        info!(model = %config.model_path.display(), "whisper model loaded");
        Ok(Self {
            ctx,
            sampling: config.sampling,
            beam_size: config.beam_size,
            n_threads: config.n_threads,
            initial_prompt: config.initial_prompt.clone(),
        })
    }

    fn params<'a>(&'a self, language: &'a str) -> FullParams<'a, 'a> {
        let strategy = match self.sampling {
            SttSampling::Greedy => SamplingStrategy::Greedy { best_of: 1 },
            SttSampling::Beam => SamplingStrategy::BeamSearch {
                beam_size: self.beam_size as i32,
                patience: -1.0,
            },
        };
        let mut params = FullParams::new(strategy);
        params.set_language(Some(language));
        params.set_n_threads(self.n_threads as i32);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        if let Some(prompt) = self.initial_prompt.as_deref() {
            params.set_initial_prompt(prompt);
        }
        params
    }
}

impl SttModel for WhisperModel {
    fn transcribe(&mut self, samples: &[f32], language: &str) -> Result<Vec<String>> {
        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| AssistantError::Stt(format!("failed to create state: {e}")))?;

        state
            .full(self.params(language), samples)
            .map_err(|e| AssistantError::Stt(format!("inference failed: {e}")))?;

        let num_segments = state.full_n_segments();
        let mut segments = Vec::with_capacity(num_segments as usize);
        for i in 0..num_segments {
            if let Some(segment) = state.get_segment(i) {
                let text = segment
                    .to_str()
                    .map_err(|e| AssistantError::Stt(format!("segment {i} text: {e}")))?;
                segments.push(text.trim().to_owned());
            }
        }
        Ok(segments)
    }
}
