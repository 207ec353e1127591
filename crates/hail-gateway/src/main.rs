// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hail Gateway - HTTP/WebSocket edge of the ride dispatch coordinator.
//!
//! Exposes the REST API the passenger/driver clients use and the WebSocket
//! endpoint their push channels connect to:
//! - `POST /auth/login` - exchange credentials for a bearer token
//! - `POST /rides` - request a ride (passenger)
//! - `POST /rides/:ride_id/accept` - claim a ride (driver, 409 when taken)
//! - `POST /rides/:ride_id/cancel` - cancel (passenger or assigned driver)
//! - `POST /rides/:ride_id/complete` - finish (assigned driver)
//! - `GET /rides/:ride_id` - ride snapshot
//! - `GET /ws/:subject_id?token=...` - push channel (driver id or ride id)
//! - `GET /health` - health check
//!
//! # Usage
//!
//! ```bash
//! # Start gateway on default port 8000
//! hail-gateway
//!
//! # Custom port and offer timeout
//! hail-gateway --port 9000 --offer-timeout 60
//!
//! # Load config from file
//! hail-gateway --config gateway.json
//! ```

mod handlers;
mod routes;
mod session;

use axum::Router;
use clap::Parser;
use hail::{AuthDirectory, ConnectionRegistry, DispatchConfig, DispatchEngine, RideStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Hail ride dispatch gateway
#[derive(Parser, Debug)]
#[command(name = "hail-gateway")]
#[command(about = "Hail Gateway - ride dispatch over HTTP/WebSocket")]
#[command(version)]
struct Args {
    /// HTTP server port
    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds a requested ride stays open before auto-cancel
    #[arg(long, default_value = "120")]
    offer_timeout: u64,

    /// Seconds without inbound traffic before a connection is closed
    #[arg(long, default_value = "300")]
    keepalive_window: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Shared application state
pub struct AppState {
    pub(crate) engine: DispatchEngine,
    pub(crate) auth: Arc<AuthDirectory>,
    pub(crate) store: Arc<RideStore>,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) config: DispatchConfig,
}

impl AppState {
    fn new(config: DispatchConfig) -> Self {
        let store = Arc::new(RideStore::new());
        let registry = Arc::new(ConnectionRegistry::new(config.channel_capacity));
        let auth = Arc::new(AuthDirectory::new());
        auth.seed(config.users.iter().cloned());

        let engine = DispatchEngine::new(
            store.clone(),
            registry.clone(),
            auth.clone(),
            config.offer_timeout(),
        );

        Self {
            engine,
            auth,
            store,
            registry,
            config,
        }
    }

    fn can_accept_client(&self) -> bool {
        self.registry.connection_count() < self.config.max_connections
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    // Load or create config, CLI flags win
    let config = if let Some(config_path) = &args.config {
        info!("Loading config from {:?}", config_path);
        DispatchConfig::from_file(config_path)?
    } else {
        DispatchConfig {
            bind_address: args.bind.parse()?,
            port: args.port,
            offer_timeout_secs: args.offer_timeout,
            keepalive_window_secs: args.keepalive_window,
            ..Default::default()
        }
    };
    config.validate()?;

    let addr = format!("{}:{}", config.bind_address, config.port);

    info!("Hail Gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Offer timeout: {}s", config.offer_timeout_secs);
    info!("Keepalive window: {}s", config.keepalive_window_secs);
    info!("Seeded users: {}", config.users.len());

    let state = Arc::new(AppState::new(config));
    let shutdown = Arc::new(Notify::new());

    // Background sweeper: offer expiry + idle connection cleanup
    spawn_sweeper(state.clone(), shutdown.clone());

    let app = build_router(state);

    info!("REST API: http://{}", addr);
    info!("WebSocket endpoint: ws://{}/ws/:subject_id", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Gateway stopped");
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .merge(routes::ws_routes())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodic sweep for expired offers and idle connections.
fn spawn_sweeper(state: Arc<AppState>, shutdown: Arc<Notify>) {
    let interval = state.config.sweep_interval();
    let keepalive = state.config.keepalive_window();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let expired = state.engine.expire_stale_offers();
                    if expired > 0 {
                        info!("Expired {} stale ride offers", expired);
                    }
                    let idle = state.registry.remove_idle(keepalive);
                    if !idle.is_empty() {
                        info!("Closed {} idle connections", idle.len());
                    }
                }
                _ = shutdown.notified() => {
                    debug!("Sweeper shutting down");
                    break;
                }
            }
        }
    });
}

async fn shutdown_signal(shutdown: Arc<Notify>) {
    tokio::signal::ctrl_c().await.ok();
    info!("Shutdown signal received, stopping gateway...");
    shutdown.notify_waiters();
}
