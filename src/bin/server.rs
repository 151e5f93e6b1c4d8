use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use maze_race_server::app::{build_router, AppState};
use maze_race_server::config::{Cli, ServerConfig};
use maze_race_server::ranking_store::RankingStore;
use maze_race_server::room_registry::{RoomRegistry, SharedRegistry};
use maze_race_server::score_api::ScoreApi;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let config = ServerConfig::try_from(Cli::parse())?;

    let store = RankingStore::open(&config.db_path, config.retention).await?;
    tracing::info!(
        db_path = %config.db_path.display(),
        retention = ?store.policy(),
        "score store ready"
    );
    let scores = Arc::new(ScoreApi::new(store, config.max_stage));
    let rooms = RoomRegistry::shared(config.rooms);

    match config.static_dir.as_deref() {
        Some(dir) => tracing::info!(static_dir = %dir.display(), "serving client build"),
        None => tracing::warn!("client build not found; serving API and WebSocket only"),
    }

    let app = build_router(AppState {
        scores: scores.clone(),
        rooms: rooms.clone(),
        static_dir: config.static_dir.clone(),
    });

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(port = config.port, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(rooms))
        .await?;

    scores.shutdown().await;
    tracing::info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl-C after telling every connected peer to go away.
async fn shutdown_signal(rooms: SharedRegistry) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown requested");
    rooms.lock().await.shutdown();
}
