//! Configuration types for the assistant pipeline.
//!
//! All sections have code-resident defaults; an optional TOML file
//! (pointed to by `VESPER_CONFIG`) overrides them. Configuration is
//! static after load.

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an optional TOML config file.
pub const CONFIG_ENV_VAR: &str = "VESPER_CONFIG";

/// Top-level configuration bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Audio capture settings.
    pub audio: AudioConfig,
    /// Wake-word detection settings.
    pub wakeword: WakewordConfig,
    /// Speech-to-text settings.
    pub stt: SttConfig,
    /// Voice activity detection settings.
    pub vad: VadConfig,
    /// Language model settings.
    pub llm: LlmConfig,
    /// Turn lifecycle timeouts and shutdown behaviour.
    pub policies: PolicyConfig,
}

impl AssistantConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AssistantError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        toml::from_str(&text).map_err(|e| {
            AssistantError::Config(format!("cannot parse config {}: {e}", path.display()))
        })
    }

    /// Load configuration from `VESPER_CONFIG` if set, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error only when an explicitly configured file is invalid;
    /// an unset variable silently yields defaults.
    pub fn load_or_default() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::load(Path::new(&path)),
            Err(_) => Ok(Self::default()),
        }
    }
}

/// Log output format.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON lines (one object per record).
    #[default]
    Json,
    /// Human-readable compact output.
    Text,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Json,
        }
    }
}

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device index (None = system default).
    pub input_device_index: Option<usize>,
    /// Number of input channels (1 = mono).
    pub channels: u16,
    /// Output frame length in samples at 16kHz. 1280 samples = 80ms,
    /// the wake-word model's native inference window.
    pub chunk_size: usize,
    /// Whether to run the RNNoise suppressor in the capture pipeline.
    ///
    /// Requires the `denoise` feature; when unavailable the pipeline
    /// captures at 16kHz directly.
    pub denoise: bool,
    /// Capacity of the frame hand-off queue between the hardware callback
    /// thread and the event loop. Overflow drops the incoming frame.
    pub queue_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device_index: None,
            channels: 1,
            chunk_size: 1280,
            denoise: true,
            queue_capacity: 100,
        }
    }
}

/// Wake-word detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakewordConfig {
    /// Model identifiers: either direct `.onnx`/`.tflite` paths or names
    /// matched against the pretrained catalog in `models_dir`.
    pub models: Vec<String>,
    /// Per-keyword score threshold for a detection.
    pub threshold: f32,
    /// Inference framework tag ("onnx" or "tflite").
    pub inference_framework: String,
    /// Directory holding pretrained wake-word model files.
    pub models_dir: PathBuf,
}

impl Default for WakewordConfig {
    fn default() -> Self {
        Self {
            models: vec!["hey_jarvis".to_owned()],
            threshold: 0.5,
            inference_framework: "onnx".to_owned(),
            models_dir: PathBuf::from("models/wakeword"),
        }
    }
}

/// Decoding strategy for the STT model.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttSampling {
    /// Greedy decoding.
    #[default]
    Greedy,
    /// Beam search decoding.
    Beam,
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Path to the GGML model file on disk.
    pub model_path: PathBuf,
    /// Language hint passed to the model.
    pub language: String,
    /// Number of inference worker threads.
    pub n_threads: usize,
    /// Decoding strategy.
    pub sampling: SttSampling,
    /// Beam width when `sampling` is beam search.
    pub beam_size: usize,
    /// Optional prompt biasing the decoder.
    pub initial_prompt: Option<String>,
    /// When set, dump each utterance buffer as a WAV file before
    /// transcription (`debug_stt_<8-hex>.wav` in the working directory).
    pub debug_dump: bool,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-base.bin"),
            language: "en".to_owned(),
            n_threads: 4,
            sampling: SttSampling::Greedy,
            beam_size: 5,
            initial_prompt: None,
            debug_dump: false,
        }
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Whether end-of-utterance detection is enabled. When disabled,
    /// listening ends only through the fail-safe timeout.
    pub enabled: bool,
    /// Speech probability threshold.
    pub threshold: f32,
    /// Minimum silence duration in ms to end an utterance.
    pub min_silence_duration_ms: u32,
    /// Padding retained around detected speech in ms.
    pub speech_pad_ms: u32,
    /// Path to the Silero VAD ONNX model (used by the `onnx` backend).
    pub model_path: PathBuf,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.5,
            min_silence_duration_ms: 1_000,
            speech_pad_ms: 300,
            model_path: PathBuf::from("models/silero_vad.onnx"),
        }
    }
}

/// Prompt formatting style for the LLM.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptFormat {
    /// `<|im_start|>role ... <|im_end|>` blocks.
    ChatMl,
    /// Llama 2 `[INST]`/`<<SYS>>` chat format.
    Llama2,
    /// `System:`/`User:`/`Assistant:` lines.
    #[default]
    Plain,
}

/// Language model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Completion endpoint URL (llama.cpp server style).
    pub endpoint: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Top-k sampling cutoff.
    pub top_k: u32,
    /// Top-p (nucleus) sampling cutoff.
    pub top_p: f32,
    /// Repetition penalty.
    pub repeat_penalty: f32,
    /// Maximum tokens to generate per turn.
    pub max_tokens: u32,
    /// Total request timeout in seconds.
    pub timeout_seconds: u64,
    /// System instruction prepended to every conversation.
    pub system_prompt: String,
    /// Maximum history turns included at prompt-build time (0 = all).
    pub max_history_turns: usize,
    /// Prompt formatting style.
    pub format: PromptFormat,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/completion".to_owned(),
            temperature: 0.7,
            top_k: 40,
            top_p: 0.9,
            repeat_penalty: 1.1,
            max_tokens: 256,
            timeout_seconds: 30,
            system_prompt: "You are a helpful voice assistant. \
                            Answer concisely and naturally."
                .to_owned(),
            max_history_turns: 5,
            format: PromptFormat::Plain,
        }
    }
}

/// Turn lifecycle timeouts and shutdown behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Fail-safe listening window: if the VAD never reports end of
    /// utterance, STT is force-stopped after this many seconds.
    pub listen_timeout_secs: f64,
    /// Grace period before exit once shutdown has been requested.
    pub shutdown_grace_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            listen_timeout_secs: 10.0,
            shutdown_grace_ms: 1_000,
        }
    }
}
