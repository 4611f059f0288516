//! mention-tracker server.
//! Serves the read API, the run trigger and `/metrics` over one Axum router.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use mention_tracker::api::{AppState, RunGate};
use mention_tracker::metrics::Metrics;
use mention_tracker::{bootstrap, router, telemetry};

const DEFAULT_PORT: u16 = 5000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let metrics = Metrics::init()?;
    let rt = bootstrap().await?;

    let state = AppState {
        store: rt.store.clone(),
        pipeline: Arc::clone(&rt.pipeline),
        gate: RunGate::new(),
        categories: Arc::new(rt.settings.judgment_criteria.categories.clone()),
    };
    let app = router(state).merge(metrics.router());

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;
    Ok(())
}
