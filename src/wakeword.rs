//! Wake-word detection.
//!
//! Scans 80ms frames for configured keywords. The model scores every
//! keyword per frame; any score at or above the threshold yields a
//! detection. The engine does not debounce itself; the state machine
//! only feeds it while IDLE, which rate-limits detections naturally.

use crate::config::WakewordConfig;
use crate::error::Result;
use std::path::Path;
use tracing::{info, warn};

/// A keyword that crossed the detection threshold.
#[derive(Debug, Clone)]
pub struct WakeDetection {
    /// Keyword (model) name.
    pub keyword: String,
    /// Score reported by the model.
    pub score: f32,
}

/// Keyword-scoring model behind the engine.
///
/// `predict` receives one frame of the model's native window length
/// (1280 samples at 16kHz) and returns per-keyword scores.
pub trait WakeModel: Send {
    /// Score every keyword for one frame.
    fn predict(&mut self, frame: &[i16]) -> Result<Vec<(String, f32)>>;
}

/// Wake-word engine over a [`WakeModel`].
pub struct WakewordEngine {
    model: Option<Box<dyn WakeModel>>,
    threshold: f32,
    running: bool,
}

impl WakewordEngine {
    /// Build the engine with the backend selected at compile time.
    ///
    /// Model names are resolved against the pretrained catalog first
    /// (see [`resolve_model_paths`]). Load failure leaves the engine
    /// inert rather than erroring; the rest of the pipeline stays up.
    #[must_use]
    pub fn new(config: &WakewordConfig) -> Self {
        if config.inference_framework != "onnx" {
            warn!(
                framework = %config.inference_framework,
                "unsupported inference framework tag; only onnx models can be loaded"
            );
        }

        let catalog = pretrained_catalog(&config.models_dir);
        let resolved = resolve_model_paths(&config.models, &catalog);
        info!(models = ?resolved, threshold = config.threshold, "wake-word engine configured");

        let model: Option<Box<dyn WakeModel>> = {
            #[cfg(feature = "onnx")]
            {
                match onnx::OnnxWakeModel::load(&resolved) {
                    Ok(m) => Some(Box::new(m)),
                    Err(e) => {
                        warn!("failed to load wake-word models: {e} — wake word inert");
                        None
                    }
                }
            }
            #[cfg(not(feature = "onnx"))]
            {
                let _ = &resolved;
                warn!("no wake-word backend compiled in (onnx feature disabled) — wake word inert");
                None
            }
        };

        Self::with_model(config.threshold, model)
    }

    /// Build the engine around an explicit model.
    #[must_use]
    pub fn with_model(threshold: f32, model: Option<Box<dyn WakeModel>>) -> Self {
        Self {
            model,
            threshold,
            running: false,
        }
    }

    /// Begin accepting frames.
    pub fn start(&mut self) {
        self.running = true;
        info!("wake-word engine started");
    }

    /// Stop accepting frames.
    pub fn stop(&mut self) {
        self.running = false;
        info!("wake-word engine stopped");
    }

    /// Whether the engine accepts frames.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Run inference on one frame. Returns the best-scoring keyword at
    /// or above the threshold, if any.
    pub fn feed_frame(&mut self, frame: &[i16]) -> Option<WakeDetection> {
        if !self.running {
            return None;
        }
        let model = self.model.as_mut()?;

        let scores = match model.predict(frame) {
            Ok(scores) => scores,
            Err(e) => {
                warn!("wake-word inference error: {e}");
                return None;
            }
        };

        let best = scores
            .into_iter()
            .filter(|(_, score)| *score >= self.threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1))?;

        info!(keyword = %best.0, score = best.1, "wake word detected");
        Some(WakeDetection {
            keyword: best.0,
            score: best.1,
        })
    }
}

/// Known model-file extensions used verbatim by the resolution policy.
const MODEL_EXTENSIONS: [&str; 2] = [".onnx", ".tflite"];

/// List model files available in the pretrained catalog directory.
/// A missing directory yields an empty catalog.
#[must_use]
pub fn pretrained_catalog(models_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(models_dir) else {
        return Vec::new();
    };
    let mut paths: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.to_str()?;
            MODEL_EXTENSIONS
                .iter()
                .any(|ext| name.ends_with(ext))
                .then(|| name.to_owned())
        })
        .collect();
    paths.sort();
    paths
}

/// Resolve configured model names to loadable paths.
///
/// Names carrying a known model-file extension are used verbatim.
/// Anything else is matched as a substring against the catalog; an
/// unmatched name passes through so the loader reports the error.
#[must_use]
pub fn resolve_model_paths(names: &[String], catalog: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|name| {
            if MODEL_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
                return name.clone();
            }
            match catalog.iter().find(|path| path.contains(name.as_str())) {
                Some(path) => path.clone(),
                None => {
                    warn!(model = %name, "model not found in pretrained catalog; passing through");
                    name.clone()
                }
            }
        })
        .collect()
}

// ── ONNX backend ────────────────────────────────────────────────────

#[cfg(feature = "onnx")]
mod onnx {
    use super::WakeModel;
    use crate::error::{AssistantError, Result};
    use ort::session::Session;
    use std::path::Path;
    use tracing::{info, warn};

    /// One scoring session per keyword model file. The keyword name is
    /// the model file's stem.
    pub struct OnnxWakeModel {
        sessions: Vec<(String, Session)>,
    }

    impl OnnxWakeModel {
        /// Load every resolvable model; at least one must succeed.
        ///
        /// # Errors
        ///
        /// Returns an error when no model could be loaded.
        pub fn load(paths: &[String]) -> Result<Self> {
            let mut sessions = Vec::new();
            for path in paths {
                let keyword = Path::new(path)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(path.as_str())
                    .to_owned();
                match Session::builder()
                    .and_then(|b| b.with_intra_threads(1))
                    .and_then(|b| b.with_inter_threads(1))
                    .and_then(|b| b.commit_from_file(path))
                {
                    Ok(session) => {
                        info!(model = %path, keyword = %keyword, "wake-word model loaded");
                        sessions.push((keyword, session));
                    }
                    Err(e) => warn!(model = %path, "cannot load wake-word model: {e}"),
                }
            }
            if sessions.is_empty() {
                return Err(AssistantError::WakeWord(
                    "no wake-word model could be loaded".into(),
                ));
            }
            Ok(Self { sessions })
        }
    }

    impl WakeModel for OnnxWakeModel {
        fn predict(&mut self, frame: &[i16]) -> Result<Vec<(String, f32)>> {
            // The models score raw 16-bit-range samples.
            let samples: Vec<f32> = frame.iter().map(|&s| f32::from(s)).collect();

            let mut scores = Vec::with_capacity(self.sessions.len());
            for (keyword, session) in &mut self.sessions {
                let input =
                    ort::value::Value::from_array(([1, samples.len()], samples.clone()))
                        .map_err(|e| AssistantError::WakeWord(format!("input tensor: {e}")))?;
                let outputs = session
                    .run(ort::inputs!["input" => input])
                    .map_err(|e| AssistantError::WakeWord(format!("inference: {e}")))?;
                let (_shape, data) = outputs[0]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| AssistantError::WakeWord(format!("extract score: {e}")))?;
                let score = data.first().copied().unwrap_or(0.0);
                scores.push((keyword.clone(), score));
            }
            Ok(scores)
        }
    }
}
