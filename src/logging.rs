//! Tracing subscriber setup.
//!
//! Structured JSON output by default (one object per record), compact
//! human output when configured. `RUST_LOG` overrides the configured
//! level directive. Per-turn correlation ids are attached as span fields
//! by the pipeline coordinator, not here.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{AssistantError, Result};
use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber.
///
/// Must be called once, before any engine is constructed.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };

    result.map_err(|e| AssistantError::Config(format!("cannot install subscriber: {e}")))
}
