//! Streaming client for the llama.cpp completion endpoint.
//!
//! Posts the built prompt with sampling parameters and consumes the SSE
//! response token by token. `cancel` aborts the in-flight request; the
//! stream then yields a cancellation error and the caller keeps whatever
//! partial output it collected.

pub mod prompts;
pub mod sse;

pub use prompts::PromptBuilder;

use crate::config::LlmConfig;
use crate::error::{AssistantError, Result};
use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use sse::SseLineParser;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sequences that terminate generation server-side.
const STOP_SEQUENCES: [&str; 4] = ["User:", "user:", "<|im_end|>", "</s>"];

/// One parsed SSE payload from the completion stream.
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    /// Token text; may be empty on bookkeeping chunks.
    #[serde(default)]
    content: String,
    /// Set on the final chunk.
    #[serde(default)]
    stop: bool,
}

/// LLM client for a llama.cpp-style HTTP server.
pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
    prompt_builder: PromptBuilder,
    /// Cancellation token of the generation in flight.
    current: Mutex<CancellationToken>,
}

impl LlmClient {
    /// Create a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AssistantError::Llm(format!("cannot build HTTP client: {e}")))?;

        let prompt_builder = PromptBuilder::new(config.system_prompt.clone(), config.format);
        info!(endpoint = %config.endpoint, format = ?config.format, "LLM client configured");

        Ok(Self {
            config: config.clone(),
            http,
            prompt_builder,
            current: Mutex::new(CancellationToken::new()),
        })
    }

    /// The prompt builder in use.
    #[must_use]
    pub fn prompt_builder(&self) -> &PromptBuilder {
        &self.prompt_builder
    }

    /// Stream tokens for `query` with the given conversation history.
    ///
    /// The returned stream yields one token per SSE chunk and ends after
    /// the server's stop marker. Errors (including cancellation) arrive
    /// as the final item.
    pub fn generate(
        &self,
        query: &str,
        history: &[(String, String)],
    ) -> impl Stream<Item = Result<String>> + Send + 'static {
        let prompt = self.prompt_builder.build(history, query);
        debug!(chars = prompt.len(), "sending prompt to LLM");

        let payload = serde_json::json!({
            "prompt": prompt,
            "temperature": self.config.temperature,
            "top_k": self.config.top_k,
            "top_p": self.config.top_p,
            "n_predict": self.config.max_tokens,
            "repeat_penalty": self.config.repeat_penalty,
            "stop": STOP_SEQUENCES,
            "stream": true,
        });

        let client = self.http.clone();
        let endpoint = self.config.endpoint.clone();
        let cancel = CancellationToken::new();
        {
            let mut slot = self
                .current
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *slot = cancel.clone();
        }

        try_stream! {
            let send = client.post(&endpoint).json(&payload).send();
            let response = tokio::select! {
                () = cancel.cancelled() => {
                    Err(AssistantError::Cancelled("LLM generation cancelled".into()))
                }
                result = send => {
                    result.map_err(|e| AssistantError::Llm(format!("LLM request failed: {e}")))
                }
            }?;

            let status = response.status();
            let response = if status != reqwest::StatusCode::OK {
                let body = response.text().await.unwrap_or_default();
                error!(%status, body = %body, "LLM API error");
                Err(AssistantError::Llm(format!("LLM request failed: {status}")))?
            } else {
                response
            };

            info!("started receiving LLM stream");
            let mut bytes = Box::pin(response.bytes_stream());
            let mut parser = SseLineParser::new();
            let mut token_count = 0usize;
            let mut first_token = true;

            'receive: loop {
                let next = tokio::select! {
                    () = cancel.cancelled() => {
                        Err(AssistantError::Cancelled("LLM generation cancelled".into()))
                    }
                    chunk = bytes.next() => Ok(chunk),
                }?;
                let Some(chunk) = next else { break };
                let chunk =
                    chunk.map_err(|e| AssistantError::Llm(format!("stream read failed: {e}")))?;

                for data in parser.push(&chunk) {
                    let parsed: CompletionChunk = match serde_json::from_str(&data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            warn!(line = %data, "failed to parse LLM response: {e}");
                            continue;
                        }
                    };

                    if !parsed.content.is_empty() {
                        if first_token {
                            info!("received first LLM token");
                            first_token = false;
                        }
                        token_count += 1;
                        yield parsed.content;
                    }

                    if parsed.stop {
                        info!(tokens = token_count, "LLM generation complete");
                        break 'receive;
                    }
                }
            }
        }
    }

    /// Collect the full response (non-streaming convenience).
    ///
    /// # Errors
    ///
    /// Returns the first stream error, including cancellation.
    pub async fn generate_simple(
        &self,
        query: &str,
        history: &[(String, String)],
    ) -> Result<String> {
        let mut stream = Box::pin(self.generate(query, history));
        let mut response = String::new();
        while let Some(token) = stream.next().await {
            response.push_str(&token?);
        }
        Ok(response)
    }

    /// Abort any in-flight generation.
    pub fn cancel(&self) {
        let token = self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        token.cancel();
        info!("cancelled LLM generation");
    }
}
