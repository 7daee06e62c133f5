//! Liveness and stats listener

use axum::{extract::State, routing::get, Json, Router};
use fanout_sfu::SfuStats;
use std::net::SocketAddr;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn router(stats: watch::Receiver<SfuStats>) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/stats", get(stats_handler))
        .with_state(stats)
}

async fn liveness() -> &'static str {
    "fanout sfu running"
}

async fn stats_handler(State(stats): State<watch::Receiver<SfuStats>>) -> Json<SfuStats> {
    Json(stats.borrow().clone())
}

/// Serve until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    stats: watch::Receiver<SfuStats>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP listener started");

    axum::serve(listener, router(stats))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
