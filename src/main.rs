mod api;
mod config;
mod db;
mod detector;
mod error;
mod fetcher;
mod maintenance;
mod prefs;
mod push;
mod refresh;
mod state;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::detector::DifferenceEngine;
use crate::error::Result;
use crate::maintenance::MaintenanceJob;
use crate::prefs::UserPreferenceStore;
use crate::push::{LogNotifier, PushScheduler};
use crate::refresh::RefreshOrchestrator;
use crate::state::SnapshotStore;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Components ---
    let snapshots = SnapshotStore::new(pool.clone());
    let engine = DifferenceEngine::new(pool.clone());
    let maintenance =
        MaintenanceJob::new(pool.clone(), Duration::from_secs(cfg.snapshot_max_age_secs));
    let prefs = UserPreferenceStore::new(pool.clone(), &cfg.known_exchanges);
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new()?);

    let fetchers = fetcher::default_fetchers(&cfg)?;
    if fetchers.is_empty() {
        warn!("No fetchers available for KNOWN_EXCHANGES, cycles will only prune and recompute");
    }
    info!(
        exchanges = %cfg.known_exchanges.join(","),
        fetchers = fetchers.len(),
        "Known exchanges: {}",
        cfg.known_exchanges.join(", "),
    );

    // --- Refresh loop ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = RefreshOrchestrator::new(
        &cfg,
        fetchers,
        snapshots.clone(),
        maintenance,
        engine.clone(),
        Arc::clone(&health),
        Arc::clone(&latency),
    );
    let refresh_task = tokio::spawn(orchestrator.run(shutdown_rx));

    // --- Push timers ---
    let push = Arc::new(PushScheduler::new(
        prefs.clone(),
        engine.clone(),
        Arc::new(LogNotifier),
        cfg.top_n,
    ));
    push.restore().await?;

    // --- HTTP API server ---
    let api_state = ApiState {
        snapshots,
        engine,
        prefs,
        push: Arc::clone(&push),
        health,
        latency,
        default_limit: cfg.top_n,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Shutdown ---
    push.shutdown();
    let _ = shutdown_tx.send(true);
    if let Err(e) = refresh_task.await {
        warn!("Refresh task ended abnormally: {e}");
    }
    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
