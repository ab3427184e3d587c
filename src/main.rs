mod analysis;
mod api;
mod classifier;
mod config;
mod db;
mod error;
mod fetcher;
mod refresh;
mod ruleset;
mod scorer;
mod state;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analysis::Analyzer;
use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::RunStore;
use crate::error::Result;
use crate::fetcher::source_from_config;
use crate::refresh::RefreshService;
use crate::ruleset::{Rulesets, SquadAliases};
use crate::state::ReportCache;

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
    // --- Rulesets and aliases ---
    let rulesets = Rulesets::load(&cfg.ruleset_path)?;
    if rulesets.get(&cfg.theme).is_none() {
        warn!(
            theme = %cfg.theme,
            "No ruleset for the configured theme; refreshes will report a missing configuration"
        );
    }
    let themes = Arc::new(rulesets.names());
    let aliases = SquadAliases::load(&cfg.aliases_path);

    // --- Database setup ---
    let store = Arc::new(RunStore::open(&cfg.db_path).await?);
    let stored = store.count_runs(&cfg.player_uid, &cfg.theme).await?;
    info!(uid = %cfg.player_uid, theme = %cfg.theme, stored, "Stored run history");

    // --- Pipeline ---
    if cfg.player_uid.is_empty() {
        warn!("PLAYER_UID not set; the provider will resolve the default bound account");
    }
    let source = source_from_config(&cfg)?;
    let analyzer = Arc::new(Analyzer::new(
        Arc::clone(&store),
        rulesets,
        aliases,
        cfg.recent_runs_count,
    ));
    let cache = ReportCache::new();
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let refresh = RefreshService::new(
        source,
        analyzer,
        Arc::clone(&cache),
        Arc::clone(&health),
        Arc::clone(&latency),
        cfg.player_uid.clone(),
    );

    // Initial pass; the HTTP API serves whatever it delivers.
    drop(refresh.submit(&cfg.theme));

    // Periodic refresh (background, every REFRESH_INTERVAL_SECS)
    if cfg.refresh_interval_secs > 0 {
        info!(
            theme = %cfg.theme,
            interval_secs = cfg.refresh_interval_secs,
            "Periodic refresh enabled"
        );
        let ticker = Arc::clone(&refresh);
        let theme = cfg.theme.clone();
        let interval_secs = cfg.refresh_interval_secs;
        tokio::spawn(async move { ticker.run(theme, interval_secs).await });
    }

    // HTTP API server
    let api_state = ApiState {
        cache,
        refresh,
        health,
        latency,
        themes,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    info!("Run store closed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
