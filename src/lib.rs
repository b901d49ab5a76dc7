//! rxsentinel -- early-warning analytics for weekly prescription uptake.
//!
//! This crate provides baseline forecasting, robust anomaly scoring, event
//! grouping, business-impact scoring and a backtest evaluator, together with
//! the SQLite store, CSV ingestion, synthetic data and HTTP report API that
//! feed and expose them.

pub mod analysis;
pub mod api;
pub mod config;
pub mod detect;
pub mod ingest;
pub mod pipeline;
pub mod report;
pub mod storage;
pub mod synth;

use anyhow::{Context, Result};

use crate::config::AppConfig;

/// Serve the report API on `config.server.bind` until the process exits.
pub async fn serve(config: AppConfig) -> Result<()> {
    tracing::info!(db_path = %config.storage.db_path.display(), "Initializing database");
    let pool = storage::open_pool(&config.storage.db_path)?;

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;
    let app = api::router(api::state::AppState::new(pool, config));

    tracing::info!(%addr, "rxsentinel listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
