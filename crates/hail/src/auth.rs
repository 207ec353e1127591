// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Auth collaborator seam.
//!
//! The coordinator treats authentication as an external collaborator that
//! issues opaque bearer tokens; everything here exists to satisfy that seam.
//! [`TokenValidator`] is the contract the dispatch side consumes;
//! [`AuthDirectory`] is the bundled in-memory implementation backing
//! `POST /auth/login`.

use crate::error::{DispatchError, DispatchResult};
use crate::ride::UserId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role carried by a validated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Passenger,
    Driver,
}

/// Identity resolved from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

/// Token validation contract consumed by the dispatch side.
pub trait TokenValidator: Send + Sync {
    /// Resolve a bearer token to a principal, or fail `Unauthorized`.
    fn validate(&self, token: &str) -> DispatchResult<Principal>;
}

/// A registered user (config-seeded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable identity referenced by rides and channel subjects.
    pub id: UserId,
    pub phone: String,
    pub password: String,
    pub role: Role,
}

/// In-memory user directory and token table.
///
/// Tokens are opaque UUIDs valid for the process lifetime; credential
/// storage technology is out of scope, so passwords are compared as-is.
pub struct AuthDirectory {
    /// phone -> user record.
    users: DashMap<String, UserRecord>,
    /// token -> principal.
    tokens: DashMap<String, Principal>,
}

impl AuthDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            tokens: DashMap::new(),
        }
    }

    /// Add or replace a user keyed by phone number.
    pub fn register(&self, user: UserRecord) {
        self.users.insert(user.phone.clone(), user);
    }

    /// Register a batch of users (config seeding).
    pub fn seed(&self, users: impl IntoIterator<Item = UserRecord>) {
        for user in users {
            self.register(user);
        }
    }

    /// Validate credentials and issue a fresh bearer token.
    pub fn login(&self, phone: &str, password: &str) -> DispatchResult<String> {
        let user = self.users.get(phone).ok_or(DispatchError::Unauthorized)?;
        if user.password != password {
            return Err(DispatchError::Unauthorized);
        }

        let token = Uuid::new_v4().to_string();
        self.tokens.insert(
            token.clone(),
            Principal {
                user_id: user.id.clone(),
                role: user.role,
            },
        );
        log::info!("Issued token for {} ({:?})", user.id, user.role);
        Ok(token)
    }

    /// Number of registered users.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl Default for AuthDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenValidator for AuthDirectory {
    fn validate(&self, token: &str) -> DispatchResult<Principal> {
        self.tokens
            .get(token)
            .map(|p| p.clone())
            .ok_or(DispatchError::Unauthorized)
    }
}
