// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection Registry - live push channels keyed by subject identity.
//!
//! A subject is either a driver (its own id) or a ride (for the passenger
//! who requested it). The registry owns connection liveness exclusively;
//! the dispatch side only reads it to locate delivery targets.
//!
//! Delivery is best-effort: `send` stamps a per-connection sequence number
//! and drops the event when the subject has no open channel or the channel
//! is full. There is no store-and-forward.

use crate::auth::{Principal, Role};
use crate::error::{DispatchError, DispatchResult};
use crate::event::{Envelope, RideEvent};
use crate::ride::{RideId, UserId};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// The identity a push channel is opened against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubjectId {
    /// A driver's own channel.
    Driver(UserId),
    /// A ride's channel, owned by the requesting passenger.
    Ride(RideId),
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Driver(id) => write!(f, "driver:{}", id),
            Self::Ride(id) => write!(f, "ride:{}", id),
        }
    }
}

/// An open connection handed to the session task.
#[derive(Debug)]
pub struct Connection {
    /// Subject this connection serves.
    pub subject: SubjectId,
    /// Registry-unique connection id; used to close without clobbering a
    /// newer connection for the same subject.
    pub id: u64,
    /// Receiving end of the push channel.
    pub rx: mpsc::Receiver<Envelope>,
}

/// Registry-side state of one connection.
struct ConnectionEntry {
    id: u64,
    principal: Principal,
    tx: mpsc::Sender<Envelope>,
    /// Outbound delivery sequence; stamped on every send, including drops,
    /// so receivers can detect gaps.
    seq: AtomicU64,
    last_seen: Instant,
}

/// Live push channels keyed by subject identity.
pub struct ConnectionRegistry {
    connections: DashMap<SubjectId, ConnectionEntry>,
    capacity: usize,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create a registry whose channels buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a channel for `subject` on behalf of `principal`.
    ///
    /// `owner` is the user id that owns the subject, resolved by the caller
    /// (the driver id itself, or the ride's passenger). Fails `Unauthorized`
    /// when the principal is not the owner or carries the wrong role.
    ///
    /// A second open for the same subject replaces the first (newest wins);
    /// the replaced channel closes.
    pub fn open(
        &self,
        subject: SubjectId,
        principal: Principal,
        owner: &str,
    ) -> DispatchResult<Connection> {
        let required_role = match subject {
            SubjectId::Driver(_) => Role::Driver,
            SubjectId::Ride(_) => Role::Passenger,
        };
        if principal.role != required_role || principal.user_id != owner {
            log::warn!(
                "Refused channel {} for principal {} ({:?})",
                subject,
                principal.user_id,
                principal.role
            );
            return Err(DispatchError::Unauthorized);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        let entry = ConnectionEntry {
            id,
            principal,
            tx,
            seq: AtomicU64::new(0),
            last_seen: Instant::now(),
        };

        if self.connections.insert(subject.clone(), entry).is_some() {
            log::info!("Replaced existing channel for {}", subject);
        } else {
            log::info!("Opened channel for {}", subject);
        }

        Ok(Connection { subject, id, rx })
    }

    /// Deliver an event to the subject's channel, if open.
    ///
    /// Silent no-op when the subject has no channel. A full channel drops
    /// the event (the sequence number is still consumed, so the client sees
    /// the gap); transitions never block on delivery.
    pub fn send(&self, subject: &SubjectId, event: RideEvent) {
        let Some(entry) = self.connections.get(subject) else {
            log::debug!("No open channel for {}, event dropped", subject);
            return;
        };

        let seq = entry.seq.fetch_add(1, Ordering::SeqCst) + 1;
        match entry.tx.try_send(Envelope { seq, event }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Channel for {} full, dropped event seq={}", subject, seq);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Channel for {} closed, dropped event seq={}", subject, seq);
            }
        }
    }

    /// Record activity on the subject's connection (keepalive).
    pub fn touch(&self, subject: &SubjectId) {
        if let Some(mut entry) = self.connections.get_mut(subject) {
            entry.last_seen = Instant::now();
        }
    }

    /// Close the subject's channel, if any.
    pub fn close(&self, subject: &SubjectId) -> bool {
        let removed = self.connections.remove(subject).is_some();
        if removed {
            log::info!("Closed channel for {}", subject);
        }
        removed
    }

    /// Close the subject's channel only if it is still connection `id`.
    ///
    /// Session cleanup uses this so a disconnecting socket cannot tear down
    /// the newer channel that replaced it.
    pub fn close_if_current(&self, subject: &SubjectId, id: u64) -> bool {
        self.connections
            .remove_if(subject, |_, entry| entry.id == id)
            .is_some()
    }

    /// Ids of all drivers with an open channel (broadcast candidate set).
    pub fn list_open_drivers(&self) -> Vec<UserId> {
        self.connections
            .iter()
            .filter_map(|e| match e.key() {
                SubjectId::Driver(id) => Some(id.clone()),
                SubjectId::Ride(_) => None,
            })
            .collect()
    }

    /// Close connections idle longer than `window`; returns their subjects.
    pub fn remove_idle(&self, window: Duration) -> Vec<SubjectId> {
        let idle: Vec<SubjectId> = self
            .connections
            .iter()
            .filter(|e| e.last_seen.elapsed() > window)
            .map(|e| e.key().clone())
            .collect();

        for subject in &idle {
            self.connections.remove(subject);
            log::info!("Closed idle channel for {}", subject);
        }
        idle
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Principal owning the subject's open connection, if any.
    pub fn principal_of(&self, subject: &SubjectId) -> Option<Principal> {
        self.connections.get(subject).map(|e| e.principal.clone())
    }
}
