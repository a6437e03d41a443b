use anyhow::Context;
use shardwatch_backend::{config::Config, create_app, spawn_flush_task};
use shardwatch_db::Database;
use std::net::SocketAddr;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting Shardwatch backend server...");
    // Load configuration from environment variables or use defaults
    let config = Config::from_env();
    tracing::info!(
        "Configuration: port={}, data_dir={}, cache={}, flush={}s, body_limit={}KB, timeout={}s",
        config.port,
        config.data_dir,
        config.cache_capacity,
        config.flush_interval.as_secs(),
        config.request_body_limit / 1024,
        config.request_timeout.as_secs(),
    );
    tracing::info!(
        "Rate limits: ingest={}/sec (burst {}), query={}/sec (burst {}), admin={}/sec (burst {})",
        config.rate_limit_ingest_per_sec,
        config.rate_limit_ingest_burst,
        config.rate_limit_query_per_sec,
        config.rate_limit_query_burst,
        config.rate_limit_admin_per_sec,
        config.rate_limit_admin_burst
    );
    if config.ingest_token.is_none() {
        tracing::warn!("INGEST_TOKEN is not set; /api/ingest will refuse every poll");
    }
    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN is not set; admin routes are disabled");
    }

    let db = Database::open(&config.data_dir, config.store_options())
        .await
        .with_context(|| format!("failed to open store at {}", config.data_dir))?;
    let flush_task = spawn_flush_task(db.clone(), config.flush_interval);

    let app = create_app(db.clone(), &config);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    flush_task.abort();
    let report = db.flush().await?;
    tracing::info!(written = report.written, failed = report.failed, "final flush complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining requests...");
}
