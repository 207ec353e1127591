// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route definitions for the REST API and the WebSocket endpoint.

use crate::handlers;
use crate::session;
use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// REST routes (the surface the stock clients depend on).
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/rides", post(handlers::create_ride))
        .route("/rides/:ride_id", get(handlers::get_ride))
        .route("/rides/:ride_id/accept", post(handlers::accept_ride))
        .route("/rides/:ride_id/cancel", post(handlers::cancel_ride))
        .route("/rides/:ride_id/complete", post(handlers::complete_ride))
        .route("/health", get(handlers::health))
}

/// WebSocket routes (push channels).
pub fn ws_routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws/:subject_id", get(session::ws_handler))
}
