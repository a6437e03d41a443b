pub mod config;
mod error;
pub mod helpers;
mod ingest;
pub mod roster;
mod routes;
mod validation;

use axum::{
    Router,
    http::StatusCode,
    routing::{delete, get, post},
};
use config::Config;
use roster::OnlineRoster;
use shardwatch_db::Database;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub db: Database,
    pub roster: OnlineRoster,
    pub admin_token: Option<String>,
    pub ingest_token: Option<String>,
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per second for /api/ingest
    pub ingest_per_sec: u64,
    /// Burst size for /api/ingest
    pub ingest_burst: u32,
    /// Requests per second for timeline, player and roster queries
    pub query_per_sec: u64,
    /// Burst size for query endpoints
    pub query_burst: u32,
    /// Requests per second for /api/admin/*
    pub admin_per_sec: u64,
    /// Burst size for admin endpoints
    pub admin_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RateLimitConfig {
    fn from(config: &Config) -> Self {
        Self {
            ingest_per_sec: config.rate_limit_ingest_per_sec,
            ingest_burst: config.rate_limit_ingest_burst,
            query_per_sec: config.rate_limit_query_per_sec,
            query_burst: config.rate_limit_query_burst,
            admin_per_sec: config.rate_limit_admin_per_sec,
            admin_burst: config.rate_limit_admin_burst,
        }
    }
}

/// Create the application router with the given database and configuration
pub fn create_app(db: Database, config: &Config) -> Router {
    let rate_limit = RateLimitConfig::from(config);
    let state = Arc::new(AppState {
        db,
        roster: OnlineRoster::new(),
        admin_token: config.admin_token.clone(),
        ingest_token: config.ingest_token.clone(),
    });

    // Six shards polled every few seconds, plus retries
    let ingest_governor = GovernorConfigBuilder::default()
        .per_second(rate_limit.ingest_per_sec.max(1))
        .burst_size(rate_limit.ingest_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("ingest rate limit is non-zero");

    let query_governor = GovernorConfigBuilder::default()
        .per_second(rate_limit.query_per_sec.max(1))
        .burst_size(rate_limit.query_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("query rate limit is non-zero");

    // Strict: admin calls are rare and destructive
    let admin_governor = GovernorConfigBuilder::default()
        .per_second(rate_limit.admin_per_sec.max(1))
        .burst_size(rate_limit.admin_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("admin rate limit is non-zero");

    let ingest_routes = Router::new()
        .route("/api/ingest", post(routes::ingest))
        .layer(GovernorLayer::new(ingest_governor));

    let query_routes = Router::new()
        .route("/api/activity/batch", post(routes::activity_batch))
        .route("/api/activity/{id}", get(routes::activity))
        .route("/api/players/{id}", get(routes::player))
        .route("/api/mapping", get(routes::mapping))
        .route("/api/online", get(routes::online))
        .route("/api/online/{shard}", get(routes::online_shard))
        .layer(GovernorLayer::new(query_governor));

    let admin_routes = Router::new()
        .route("/api/admin/players/{id}/real-name", post(routes::set_real_name))
        .route("/api/admin/players/{id}", delete(routes::delete_player))
        .route("/api/admin/flush", post(routes::flush))
        .route("/api/admin/reset", post(routes::reset))
        .route("/api/admin/cleanup", post(routes::cleanup))
        .route("/api/admin/stats", get(routes::stats))
        .layer(GovernorLayer::new(admin_governor));

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .merge(ingest_routes)
        .merge(query_routes)
        .merge(admin_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(config.request_body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Write dirty records out every `interval` until the runtime shuts down.
pub fn spawn_flush_task(db: Database, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match db.flush().await {
                Ok(report) if report.failed > 0 => {
                    tracing::warn!(written = report.written, failed = report.failed, "flush left records dirty");
                }
                Ok(report) if report.written > 0 => {
                    tracing::debug!(written = report.written, "flushed dirty records");
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Flush task error: {}", e),
            }
        }
    })
}
