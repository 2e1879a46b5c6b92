//! Poller binary: loads config, starts one adapter and writes every delivered
//! event to stdout as a JSON line until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use saas_event_poller::config;
use saas_event_poller::metrics::{Metrics, ENV_METRICS_ADDR};
use saas_event_poller::{ChannelSink, JsonLinesWriter, PollingAdapter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ENV_LOG_FORMAT: &str = "POLLER_LOG_FORMAT";

/// Logs go to stderr; stdout carries the event stream.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("poller=info,warn"));

    let json = std::env::var(ENV_LOG_FORMAT)
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

async fn serve_metrics(addr: String) -> anyhow::Result<()> {
    let metrics = Metrics::init()?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding metrics listener on {addr}"))?;
    tracing::info!(target: "poller", %addr, "metrics endpoint listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, metrics.router()).await {
            tracing::warn!(target: "poller", error = ?e, "metrics server stopped");
        }
    });
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default()?;

    if let Ok(addr) = std::env::var(ENV_METRICS_ADDR) {
        serve_metrics(addr).await?;
    }

    let (sink, rx) = ChannelSink::new(cfg.sink.buffer_capacity);
    let writer = tokio::spawn(async move {
        let mut w = JsonLinesWriter::new(tokio::io::stdout());
        w.run(rx).await
    });

    let (adapter, stopped) = PollingAdapter::from_config(&cfg, Arc::new(sink))?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::warn!(target: "poller", error = ?e, "ctrl-c handler failed");
            }
            tracing::info!(target: "poller", "shutdown requested");
        }
        _ = stopped.wait() => {
            tracing::warn!(target: "poller", adapter = adapter.name(), "adapter stopped on its own");
        }
    }

    if let Err(e) = adapter.close().await {
        tracing::error!(target: "poller", error = %e, "close failed");
    }

    match writer.await {
        Ok(Ok(n)) => tracing::info!(target: "poller", written = n, "event writer finished"),
        Ok(Err(e)) => tracing::error!(target: "poller", error = ?e, "event writer failed"),
        Err(e) => tracing::error!(target: "poller", error = ?e, "event writer task panicked"),
    }
    Ok(())
}
