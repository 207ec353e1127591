// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP request handlers for the REST API.

use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hail::{CancelActor, DispatchError, Principal, Ride, Role, TokenValidator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let code = match &err {
            DispatchError::Unauthorized => 401,
            DispatchError::NotFound(_) => 404,
            // Lost accept race: non-retryable, the client should drop the offer
            DispatchError::Conflict { .. } => 409,
            DispatchError::InvalidTransition { .. } => 422,
        };
        Self {
            error: err.to_string(),
            code,
        }
    }
}

/// Extract the bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::from(DispatchError::Unauthorized))
}

/// Validate the request's bearer token.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let token = bearer_token(headers)?;
    Ok(state.auth.validate(token)?)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub phone: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
}

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let access_token = state.auth.login(&req.phone, &req.password)?;
    Ok(Json(LoginResponse { access_token }))
}

#[derive(Debug, Deserialize)]
pub struct CreateRideRequest {
    pub pickup: String,
    pub destination: String,
}

/// POST /rides
pub async fn create_ride(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateRideRequest>,
) -> Result<Response, ApiError> {
    let principal = authenticate(&state, &headers)?;
    if principal.role != Role::Passenger {
        return Err(DispatchError::Unauthorized.into());
    }

    let ride = state
        .engine
        .request_ride(&principal.user_id, &req.pickup, &req.destination);
    Ok((StatusCode::CREATED, Json(ride)).into_response())
}

/// POST /rides/:ride_id/accept
pub async fn accept_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Ride>, ApiError> {
    let principal = authenticate(&state, &headers)?;
    if principal.role != Role::Driver {
        return Err(DispatchError::Unauthorized.into());
    }

    let ride = state.engine.accept_ride(&principal.user_id, &ride_id)?;
    Ok(Json(ride))
}

/// POST /rides/:ride_id/cancel
pub async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Ride>, ApiError> {
    let principal = authenticate(&state, &headers)?;
    let actor = match principal.role {
        Role::Passenger => CancelActor::Passenger(principal.user_id),
        Role::Driver => CancelActor::Driver(principal.user_id),
    };

    let ride = state.engine.cancel_ride(actor, &ride_id)?;
    Ok(Json(ride))
}

/// POST /rides/:ride_id/complete
pub async fn complete_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Ride>, ApiError> {
    let principal = authenticate(&state, &headers)?;
    if principal.role != Role::Driver {
        return Err(DispatchError::Unauthorized.into());
    }

    let ride = state.engine.complete_ride(&principal.user_id, &ride_id)?;
    Ok(Json(ride))
}

/// GET /rides/:ride_id
pub async fn get_ride(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Ride>, ApiError> {
    let principal = authenticate(&state, &headers)?;
    let ride = state.store.get(&ride_id)?;

    // Visible only to the requesting passenger and the assigned driver
    let allowed = match principal.role {
        Role::Passenger => ride.passenger == principal.user_id,
        Role::Driver => ride.driver.as_deref() == Some(principal.user_id.as_str()),
    };
    if !allowed {
        return Err(DispatchError::Unauthorized.into());
    }

    Ok(Json(ride))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rides": state.store.ride_count(),
        "connections": state.registry.connection_count(),
        "max_connections": state.config.max_connections,
    }))
}
