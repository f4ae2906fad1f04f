/// file: src/main.rs
/// description: CLI entrypoint, runtime setup, and server startup orchestration.
mod api;
mod auth;
mod cache;
mod config;
mod database;
mod models;
mod scraper;
mod sources;

use anyhow::Result;
use axum::http::{HeaderValue, Method, header};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// dealfinder — price-comparison backend over live e-commerce scrapes.
#[derive(Debug, Parser)]
#[command(name = "dealfinder", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API server.
    Server,
    /// Health-check all dependencies and exit.
    Healthcheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Structured logging — respect RUST_LOG; default to "info".
    // Set LOG_FORMAT=json (e.g. in production) for machine-readable output.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dealfinder=debug"));

    let json_format = std::env::var("LOG_FORMAT").as_deref() == Ok("json");
    if json_format {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    let cfg = config::Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Config load error: {e}");
        panic!("Cannot start without a valid configuration: {e}");
    });

    let cli = Cli::parse();

    match cli.command {
        Command::Server => run_server(cfg).await,
        Command::Healthcheck => run_healthcheck(cfg).await,
    }
}

// ---------------------------------------------------------------------------
// Sub-command handlers
// ---------------------------------------------------------------------------

async fn run_server(cfg: config::Config) -> Result<()> {
    let addr = cfg.server.addr()?;
    info!(%addr, "API server listening");

    let state = build_state(&cfg).await?;

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if !cfg.server.cors_allow_origins.is_empty() {
        let mut origins = Vec::with_capacity(cfg.server.cors_allow_origins.len());
        for origin in &cfg.server.cors_allow_origins {
            origins.push(HeaderValue::from_str(origin).map_err(|e| {
                anyhow::anyhow!("Invalid CORS_ALLOW_ORIGINS entry `{origin}`: {e}")
            })?);
        }
        cors = cors.allow_origin(origins);
    }

    let app = api::router(state)
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_healthcheck(cfg: config::Config) -> Result<()> {
    info!("Running health check…");

    let pool = database::build_pool(&cfg.database)?;
    let db = database::DbClient::new(pool);
    match db.ping().await {
        Ok(()) => info!("Database: ok"),
        Err(e) => tracing::warn!("Database: {e}"),
    }

    match cache::ProductCache::connect(&cfg.redis).await {
        Ok(cache) => match cache.ping().await {
            Ok(()) => info!("Redis: ok"),
            Err(e) => tracing::warn!("Redis: {e}"),
        },
        Err(e) => tracing::warn!("Redis: {e}"),
    }

    info!("Health check complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared app state
// ---------------------------------------------------------------------------

async fn build_state(cfg: &config::Config) -> Result<api::AppState> {
    let pool = database::build_pool(&cfg.database)?;
    let db = database::DbClient::new(pool);

    // Fail fast before binding the socket — a misconfigured DB should not
    // result in a silently broken server that accepts requests but can't
    // fulfil them.
    db.ping().await.map_err(|e| {
        anyhow::anyhow!(
            "Database connectivity check failed: {}\n\
             Hint: verify POSTGRES_* env vars are correct, PostgreSQL is running, \
             and migrations/001_initial.sql has been applied.\n\
             Cause chain: {}",
            e,
            error_chain(&e)
        )
    })?;

    let cache = cache::ProductCache::connect(&cfg.redis).await.map_err(|e| {
        anyhow::anyhow!(
            "Redis connectivity check failed: {}\n\
             Hint: verify REDIS_URL points at a reachable instance.\n\
             Cause chain: {}",
            e,
            error_chain(&e)
        )
    })?;

    let scraper = Arc::new(scraper::Scraper::new(&cfg.scraper, &cfg.proxy)?);
    info!(
        sources = ?scraper
            .enabled_sources()
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>(),
        "scrape sources enabled"
    );

    let auth = auth::AuthService::new(&cfg.auth);
    let resources = api::ResourceSnapshot::new();
    api::spawn_resource_monitor(resources.clone());

    Ok(api::AppState {
        db,
        cache,
        scraper,
        auth,
        cfg: Arc::new(cfg.clone()),
        resources,
    })
}

/// Walks the `std::error::Error::source()` chain and returns each cause
/// joined with " -> " so the full context is visible in a single log line.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut parts = Vec::new();
    let mut src = e.source();
    while let Some(cause) = src {
        parts.push(cause.to_string());
        src = cause.source();
    }
    if parts.is_empty() {
        String::from("(no further cause)")
    } else {
        parts.join(" -> ")
    }
}
