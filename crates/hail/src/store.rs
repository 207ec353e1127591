// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ride Store - authoritative ride table with optimistic concurrency.
//!
//! The store is the single source of truth for ride state and the only
//! writer of `state`/`driver`/`version`. Per-ride serialization comes from
//! [`RideStore::compare_and_transition`] alone: every transition attempt
//! supplies the version it last observed, and exactly one concurrent attempt
//! can succeed per version. Operations on different rides never contend on a
//! global lock.

use crate::error::{DispatchError, DispatchResult};
use crate::ride::{now_ms, Ride, RideState, UserId};
use dashmap::DashMap;
use std::time::Duration;
use uuid::Uuid;

/// Authoritative table of ride records.
///
/// Rides are never physically deleted; `cancelled`/`completed` records are
/// retained for history.
pub struct RideStore {
    rides: DashMap<String, Ride>,
}

impl RideStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            rides: DashMap::new(),
        }
    }

    /// Insert a fresh `requested` ride (version 1) and return its snapshot.
    pub fn create_ride(
        &self,
        passenger: impl Into<UserId>,
        pickup: impl Into<String>,
        destination: impl Into<String>,
    ) -> Ride {
        let ride = Ride::new(Uuid::new_v4().to_string(), passenger, pickup, destination);
        log::debug!("Created ride {} for {}", ride.id, ride.passenger);
        self.rides.insert(ride.id.clone(), ride.clone());
        ride
    }

    /// Get a ride snapshot by id.
    pub fn get(&self, ride_id: &str) -> DispatchResult<Ride> {
        self.rides
            .get(ride_id)
            .map(|r| r.clone())
            .ok_or_else(|| DispatchError::NotFound(ride_id.to_string()))
    }

    /// Atomically transition a ride, conditioned on the observed version.
    ///
    /// Succeeds only when the stored version equals `expected_version` AND
    /// the stored state equals `from`; then bumps the version, sets `to` and
    /// the transition timestamp, and assigns `driver` when entering
    /// `accepted`. Any mismatch fails `Conflict` and leaves the record
    /// untouched.
    ///
    /// The entry is held exclusively for the duration of the check-and-write,
    /// so concurrent attempts on the same ride serialize here and exactly one
    /// wins per version.
    pub fn compare_and_transition(
        &self,
        ride_id: &str,
        expected_version: u64,
        from: RideState,
        to: RideState,
        driver: Option<&str>,
    ) -> DispatchResult<Ride> {
        let mut entry = self
            .rides
            .get_mut(ride_id)
            .ok_or_else(|| DispatchError::NotFound(ride_id.to_string()))?;

        if entry.version != expected_version || entry.state != from {
            return Err(DispatchError::Conflict {
                ride: ride_id.to_string(),
                state: entry.state,
            });
        }

        entry.state = to;
        entry.version += 1;
        entry.updated_at_ms = now_ms();
        if to == RideState::Accepted {
            // Only place a driver is ever assigned; immutable afterwards.
            entry.driver = driver.map(|d| d.to_string());
        }

        log::debug!(
            "Ride {} transitioned {} -> {} (v{})",
            ride_id,
            from,
            to,
            entry.version
        );
        Ok(entry.clone())
    }

    /// Snapshot of `requested` rides older than `max_age`.
    ///
    /// Feeds the offer-timeout sweep; the caller still transitions each ride
    /// through [`Self::compare_and_transition`], so a ride accepted between
    /// the snapshot and the sweep simply loses the race and stays accepted.
    pub fn stale_requested(&self, max_age: Duration) -> Vec<Ride> {
        let now = now_ms();
        let max_age_ms = max_age.as_millis() as u64;
        self.rides
            .iter()
            .filter(|r| r.state == RideState::Requested && r.age_ms(now) > max_age_ms)
            .map(|r| r.clone())
            .collect()
    }

    /// Number of rides ever created (terminal records included).
    pub fn ride_count(&self) -> usize {
        self.rides.len()
    }
}

impl Default for RideStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get() {
        let store = RideStore::new();
        let ride = store.create_ride("p-1", "Point A", "Point B");

        let fetched = store.get(&ride.id).unwrap();
        assert_eq!(fetched.id, ride.id);
        assert_eq!(fetched.state, RideState::Requested);
        assert_eq!(fetched.version, 1);
    }

    #[test]
    fn test_get_unknown_ride() {
        let store = RideStore::new();
        assert_eq!(
            store.get("nope"),
            Err(DispatchError::NotFound("nope".into()))
        );
    }

    #[test]
    fn test_transition_success_bumps_version() {
        let store = RideStore::new();
        let ride = store.create_ride("p-1", "A", "B");

        let accepted = store
            .compare_and_transition(&ride.id, 1, RideState::Requested, RideState::Accepted, Some("d-1"))
            .unwrap();
        assert_eq!(accepted.state, RideState::Accepted);
        assert_eq!(accepted.version, 2);
        assert_eq!(accepted.driver.as_deref(), Some("d-1"));
    }

    #[test]
    fn test_transition_stale_version_conflicts() {
        let store = RideStore::new();
        let ride = store.create_ride("p-1", "A", "B");

        store
            .compare_and_transition(&ride.id, 1, RideState::Requested, RideState::Accepted, Some("d-1"))
            .unwrap();

        // Second attempt still carries version 1
        let err = store
            .compare_and_transition(&ride.id, 1, RideState::Requested, RideState::Accepted, Some("d-2"))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict { .. }));

        // Loser left no trace
        let stored = store.get(&ride.id).unwrap();
        assert_eq!(stored.driver.as_deref(), Some("d-1"));
        assert_eq!(stored.version, 2);
    }

    #[test]
    fn test_transition_wrong_state_conflicts() {
        let store = RideStore::new();
        let ride = store.create_ride("p-1", "A", "B");

        let err = store
            .compare_and_transition(&ride.id, 1, RideState::Accepted, RideState::Completed, None)
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Conflict {
                ride: ride.id.clone(),
                state: RideState::Requested,
            }
        );
        assert_eq!(store.get(&ride.id).unwrap().version, 1);
    }

    #[test]
    fn test_driver_survives_later_transitions() {
        let store = RideStore::new();
        let ride = store.create_ride("p-1", "A", "B");

        store
            .compare_and_transition(&ride.id, 1, RideState::Requested, RideState::Accepted, Some("d-1"))
            .unwrap();
        let completed = store
            .compare_and_transition(&ride.id, 2, RideState::Accepted, RideState::Completed, None)
            .unwrap();

        assert_eq!(completed.driver.as_deref(), Some("d-1"));
        assert_eq!(completed.version, 3);
    }

    #[test]
    fn test_stale_requested_filters_by_age_and_state() {
        let store = RideStore::new();
        let old = store.create_ride("p-1", "A", "B");
        let fresh = store.create_ride("p-2", "C", "D");
        let accepted = store.create_ride("p-3", "E", "F");
        store
            .compare_and_transition(&accepted.id, 1, RideState::Requested, RideState::Accepted, Some("d-1"))
            .unwrap();

        // Backdate the old ride past the cutoff
        store.rides.get_mut(&old.id).unwrap().created_at_ms -= 10_000;

        let stale = store.stale_requested(Duration::from_secs(5));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);

        // Fresh and accepted rides are never stale
        assert!(stale.iter().all(|r| r.id != fresh.id));
        let stale_all = store.stale_requested(Duration::from_secs(0));
        assert!(stale_all.iter().all(|r| r.id != accepted.id));
    }

    #[test]
    fn test_concurrent_cas_exactly_one_winner() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(RideStore::new());
        let ride = store.create_ride("p-1", "A", "B");

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let ride_id = ride.id.clone();
            handles.push(thread::spawn(move || {
                store.compare_and_transition(
                    &ride_id,
                    1,
                    RideState::Requested,
                    RideState::Accepted,
                    Some(&format!("d-{}", i)),
                )
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(DispatchError::Conflict { .. })))
            .count();

        assert_eq!(wins, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(store.get(&ride.id).unwrap().version, 2);
    }
}
