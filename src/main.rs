//! Arena Backend - match lifecycle service
//!
//! HTTP API over the match engine plus the lifecycle sweeper running as a
//! background task.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arena_backend::api::create_router;
use arena_backend::clock::SystemClock;
use arena_backend::config::LifecycleConfig;
use arena_backend::engine::ops::MatchEngine;
use arena_backend::engine::sweeper::LifecycleSweeper;
use arena_backend::repo::{Repository, SqliteRepository};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let db_path = env::var("DB_PATH").unwrap_or_else(|_| "arena.db".to_string());
    let repo: Arc<dyn Repository> =
        Arc::new(SqliteRepository::new(&db_path).context("Failed to open database")?);
    info!(db_path = %db_path, "database ready");

    let clock = Arc::new(SystemClock);
    let config = LifecycleConfig::from_env();
    let engine = Arc::new(MatchEngine::new(repo.clone(), clock.clone()));

    let sweeper = Arc::new(LifecycleSweeper::new(
        engine.clone(),
        repo,
        clock,
        config,
    ));
    tokio::spawn(sweeper.run());

    let app = create_router(engine)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn load_env() {
    let _ = dotenv();
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arena_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
