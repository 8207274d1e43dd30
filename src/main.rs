//! Binary entry point: wire config, logging, signals and the pipeline.
//!
//! Exits 0 on clean shutdown, non-zero when startup fails (e.g. the
//! capture device cannot be opened).

use anyhow::Context;
use tracing::info;
use vesper::config::AssistantConfig;
use vesper::events::{Event, EventKind};
use vesper::pipeline::Coordinator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AssistantConfig::load_or_default().context("loading configuration")?;
    vesper::logging::init(&config.logging).context("initialising logging")?;
    info!("starting vesper");

    let mut coordinator = Coordinator::new(config).context("building pipeline")?;

    // Console observer: print completed assistant responses.
    coordinator
        .router_mut()
        .register(EventKind::LlmComplete, |event| async move {
            if let Event::LlmComplete { response } = event {
                if !response.is_empty() {
                    println!("assistant: {response}");
                }
            }
            Ok(())
        });

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        cancel.cancel();
    });

    coordinator.run().await.context("pipeline failed")?;
    info!("shut down cleanly");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
