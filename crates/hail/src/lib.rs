// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Hail - Ride Dispatch Coordinator
//!
//! Core of a ride-hailing backend: ride lifecycle state, fan-out of new ride
//! requests to connected drivers, exactly-one-winner accept-race resolution,
//! and ordered push notifications over long-lived channels.
//!
//! ## Quick Start
//!
//! ```rust
//! use hail::{AuthDirectory, ConnectionRegistry, DispatchEngine, RideStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let store = Arc::new(RideStore::new());
//! let registry = Arc::new(ConnectionRegistry::new(64));
//! let auth = Arc::new(AuthDirectory::new());
//! let engine = DispatchEngine::new(store, registry, auth, Duration::from_secs(120));
//!
//! let ride = engine.request_ride("passenger_1", "Point A", "Point B");
//! let accepted = engine.accept_ride("driver_1", &ride.id).unwrap();
//! assert_eq!(accepted.driver.as_deref(), Some("driver_1"));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                      Dispatch Engine                         |
//! |   request / accept / cancel / complete / offer expiry        |
//! +--------------------------------------------------------------+
//! |        Ride Store          |       Notification Fan-out      |
//! |  compare-and-transition    |  transition -> (subject, event) |
//! |  (optimistic concurrency)  |        best-effort sends        |
//! +--------------------------------------------------------------+
//! |                    Connection Registry                       |
//! |   subject-keyed push channels, seq stamping, keepalive       |
//! +--------------------------------------------------------------+
//! ```
//!
//! State truth lives in the [`RideStore`]; notifications are a best-effort
//! projection of it. Losing a push never affects a committed transition.
//!
//! The HTTP/WebSocket edge lives in the `hail-gateway` crate.

/// Auth collaborator seam (principals, token validation, user directory).
pub mod auth;
/// Coordinator configuration.
pub mod config;
/// Dispatch Engine (lifecycle operations, accept arbitration).
pub mod dispatch;
/// Error taxonomy.
pub mod error;
/// Push-event taxonomy and delivery envelope.
pub mod event;
/// Notification Fan-out.
pub mod notify;
/// Connection Registry (live push channels).
pub mod registry;
/// Ride records and lifecycle state.
pub mod ride;
/// Ride Store (optimistic concurrency).
pub mod store;

pub use auth::{AuthDirectory, Principal, Role, TokenValidator, UserRecord};
pub use config::{ConfigError, DispatchConfig};
pub use dispatch::{AcceptAttempt, DispatchEngine};
pub use error::{DispatchError, DispatchResult};
pub use event::{Envelope, RideEvent};
pub use notify::{CancelActor, Notifier};
pub use registry::{Connection, ConnectionRegistry, SubjectId};
pub use ride::{Ride, RideId, RideState, UserId};
pub use store::RideStore;
