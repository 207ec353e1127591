// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dispatch Engine - ride lifecycle operations and accept arbitration.
//!
//! The engine holds no locks of its own: per-ride serialization is delegated
//! entirely to the store's compare-and-transition primitive, so concurrent
//! accept attempts on one ride resolve to exactly one winner and the losers
//! return immediately with `Conflict`. Operations on different rides never
//! block each other.
//!
//! Fan-out runs synchronously after each committed transition, so events for
//! a single ride reach a given subject in commit order.

use crate::auth::{Role, TokenValidator};
use crate::error::{DispatchError, DispatchResult};
use crate::notify::{CancelActor, Notifier};
use crate::registry::{Connection, ConnectionRegistry, SubjectId};
use crate::ride::{Ride, RideId, RideState, UserId};
use crate::store::RideStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An in-flight accept attempt.
///
/// Ephemeral: exists only for the duration of the arbitration and is never
/// persisted. The winner is decided by the store's compare-and-transition.
#[derive(Debug)]
pub struct AcceptAttempt {
    pub ride_id: RideId,
    pub driver: UserId,
    pub at: Instant,
}

impl AcceptAttempt {
    fn new(ride_id: &str, driver: &str) -> Self {
        Self {
            ride_id: ride_id.to_string(),
            driver: driver.to_string(),
            at: Instant::now(),
        }
    }
}

/// Ride dispatch coordinator.
pub struct DispatchEngine {
    store: Arc<RideStore>,
    registry: Arc<ConnectionRegistry>,
    notifier: Notifier,
    auth: Arc<dyn TokenValidator>,
    offer_timeout: Duration,
}

impl DispatchEngine {
    /// Create an engine over the given store, registry and auth collaborator.
    pub fn new(
        store: Arc<RideStore>,
        registry: Arc<ConnectionRegistry>,
        auth: Arc<dyn TokenValidator>,
        offer_timeout: Duration,
    ) -> Self {
        let notifier = Notifier::new(registry.clone());
        Self {
            store,
            registry,
            notifier,
            auth,
            offer_timeout,
        }
    }

    /// Create a ride and offer it to all currently connected drivers.
    ///
    /// Returns the created ride synchronously; the broadcast is best-effort
    /// and never blocks the caller.
    pub fn request_ride(&self, passenger: &str, pickup: &str, destination: &str) -> Ride {
        let ride = self.store.create_ride(passenger, pickup, destination);
        log::info!("Ride {} requested by {}", ride.id, passenger);
        self.notifier.offer_broadcast(&ride);
        ride
    }

    /// Try to claim a ride for `driver`.
    ///
    /// Exactly one concurrent attempt per ride succeeds. Losing the race is
    /// `Conflict` (non-retryable: the ride is taken); accepting a terminal
    /// ride is `InvalidTransition`.
    pub fn accept_ride(&self, driver: &str, ride_id: &str) -> DispatchResult<Ride> {
        let attempt = AcceptAttempt::new(ride_id, driver);
        let current = self.store.get(ride_id)?;

        match current.state {
            RideState::Requested => {}
            RideState::Accepted => {
                log::debug!(
                    "Accept attempt by {} on {}: already taken by {:?}",
                    attempt.driver,
                    attempt.ride_id,
                    current.driver
                );
                return Err(DispatchError::Conflict {
                    ride: ride_id.to_string(),
                    state: current.state,
                });
            }
            state => {
                return Err(DispatchError::InvalidTransition {
                    from: state,
                    to: RideState::Accepted,
                });
            }
        }

        let ride = self
            .store
            .compare_and_transition(
                ride_id,
                current.version,
                RideState::Requested,
                RideState::Accepted,
                Some(driver),
            )
            .inspect_err(|_| {
                log::debug!(
                    "Accept attempt by {} on {} lost the race",
                    attempt.driver,
                    attempt.ride_id
                );
            })?;

        log::info!(
            "Ride {} accepted by {} in {:?}",
            ride.id,
            driver,
            attempt.at.elapsed()
        );
        self.notifier.accept_committed(&ride);
        Ok(ride)
    }

    /// Cancel a ride on behalf of `actor`.
    ///
    /// Legal from `requested` or `accepted`. Passengers may cancel their own
    /// ride; a driver only the ride it was assigned; the system actor (offer
    /// expiry) anything still pending.
    pub fn cancel_ride(&self, actor: CancelActor, ride_id: &str) -> DispatchResult<Ride> {
        let current = self.store.get(ride_id)?;

        match &actor {
            CancelActor::Passenger(id) => {
                if *id != current.passenger {
                    return Err(DispatchError::Unauthorized);
                }
            }
            CancelActor::Driver(id) => {
                if current.driver.as_deref() != Some(id.as_str()) {
                    return Err(DispatchError::Unauthorized);
                }
            }
            CancelActor::System => {}
        }

        if current.state.is_terminal() {
            return Err(DispatchError::InvalidTransition {
                from: current.state,
                to: RideState::Cancelled,
            });
        }

        let was_requested = current.state == RideState::Requested;
        let ride = self.store.compare_and_transition(
            ride_id,
            current.version,
            current.state,
            RideState::Cancelled,
            None,
        )?;

        log::info!("Ride {} cancelled by {:?}", ride.id, actor);
        self.notifier.cancel_committed(&ride, was_requested, &actor);
        Ok(ride)
    }

    /// Complete a ride; only the assigned driver may, and only from
    /// `accepted`.
    pub fn complete_ride(&self, driver: &str, ride_id: &str) -> DispatchResult<Ride> {
        let current = self.store.get(ride_id)?;

        if current.state != RideState::Accepted {
            return Err(DispatchError::InvalidTransition {
                from: current.state,
                to: RideState::Completed,
            });
        }
        if current.driver.as_deref() != Some(driver) {
            return Err(DispatchError::Unauthorized);
        }

        let ride = self.store.compare_and_transition(
            ride_id,
            current.version,
            RideState::Accepted,
            RideState::Completed,
            None,
        )?;

        log::info!("Ride {} completed by {}", ride.id, driver);
        self.notifier.complete_committed(&ride);
        Ok(ride)
    }

    /// Cancel `requested` rides that outlived the offer timeout.
    ///
    /// Each stale ride is transitioned at the version the snapshot observed,
    /// so a ride accepted between snapshot and sweep loses nothing: its CAS
    /// fails `Conflict` and the sweep moves on.
    pub fn expire_stale_offers(&self) -> usize {
        let mut expired = 0;
        for stale in self.store.stale_requested(self.offer_timeout) {
            match self.store.compare_and_transition(
                &stale.id,
                stale.version,
                RideState::Requested,
                RideState::Cancelled,
                None,
            ) {
                Ok(ride) => {
                    log::info!("Ride {} expired with no accept", ride.id);
                    self.notifier
                        .cancel_committed(&ride, true, &CancelActor::System);
                    expired += 1;
                }
                Err(DispatchError::Conflict { .. }) => {
                    // Claimed (or cancelled) between snapshot and sweep
                }
                Err(e) => {
                    log::warn!("Offer expiry for {} failed: {}", stale.id, e);
                }
            }
        }
        expired
    }

    /// Authorize and open a push channel for the WebSocket handshake.
    ///
    /// The token's role decides how `raw_subject` is read: drivers claim
    /// their own id, passengers claim a ride id. Ownership is enforced by
    /// the registry; an unknown ride surfaces `NotFound`.
    pub fn open_channel(&self, raw_subject: &str, token: &str) -> DispatchResult<Connection> {
        let principal = self.auth.validate(token)?;

        let (subject, owner) = match principal.role {
            Role::Driver => (
                SubjectId::Driver(raw_subject.to_string()),
                raw_subject.to_string(),
            ),
            Role::Passenger => {
                let ride = self.store.get(raw_subject)?;
                (SubjectId::Ride(raw_subject.to_string()), ride.passenger)
            }
        };

        self.registry.open(subject, principal, &owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthDirectory, Principal, UserRecord};
    use crate::event::RideEvent;

    fn directory() -> Arc<AuthDirectory> {
        let dir = AuthDirectory::new();
        dir.seed([
            UserRecord {
                id: "p-1".into(),
                phone: "+1".into(),
                password: "pw".into(),
                role: Role::Passenger,
            },
            UserRecord {
                id: "d-1".into(),
                phone: "+2".into(),
                password: "pw".into(),
                role: Role::Driver,
            },
            UserRecord {
                id: "d-2".into(),
                phone: "+3".into(),
                password: "pw".into(),
                role: Role::Driver,
            },
        ]);
        Arc::new(dir)
    }

    fn engine_with(offer_timeout: Duration) -> (DispatchEngine, Arc<ConnectionRegistry>, Arc<AuthDirectory>) {
        let store = Arc::new(RideStore::new());
        let registry = Arc::new(ConnectionRegistry::new(32));
        let auth = directory();
        let engine = DispatchEngine::new(store, registry.clone(), auth.clone(), offer_timeout);
        (engine, registry, auth)
    }

    fn engine() -> (DispatchEngine, Arc<ConnectionRegistry>, Arc<AuthDirectory>) {
        engine_with(Duration::from_secs(120))
    }

    fn open_driver(reg: &ConnectionRegistry, id: &str) -> Connection {
        reg.open(
            SubjectId::Driver(id.into()),
            Principal {
                user_id: id.into(),
                role: Role::Driver,
            },
            id,
        )
        .unwrap()
    }

    fn open_ride(reg: &ConnectionRegistry, ride_id: &str, passenger: &str) -> Connection {
        reg.open(
            SubjectId::Ride(ride_id.into()),
            Principal {
                user_id: passenger.into(),
                role: Role::Passenger,
            },
            passenger,
        )
        .unwrap()
    }

    fn drain(conn: &mut Connection) -> Vec<RideEvent> {
        let mut events = Vec::new();
        while let Ok(envelope) = conn.rx.try_recv() {
            events.push(envelope.event);
        }
        events
    }

    #[test]
    fn test_request_broadcasts_to_connected_drivers() {
        let (engine, registry, _) = engine();
        let mut d1 = open_driver(&registry, "d-1");
        let mut d2 = open_driver(&registry, "d-2");

        let ride = engine.request_ride("p-1", "Point A", "Point B");
        assert_eq!(ride.state, RideState::Requested);
        assert_eq!(ride.version, 1);

        for conn in [&mut d1, &mut d2] {
            let events = drain(conn);
            assert_eq!(events.len(), 1);
            match &events[0] {
                RideEvent::RideAvailable { ride: offered } => assert_eq!(offered.id, ride.id),
                other => panic!("Expected RideAvailable, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_accept_happy_path() {
        let (engine, registry, _) = engine();
        let ride = engine.request_ride("p-1", "A", "B");
        let mut passenger = open_ride(&registry, &ride.id, "p-1");

        let accepted = engine.accept_ride("d-1", &ride.id).unwrap();
        assert_eq!(accepted.state, RideState::Accepted);
        assert_eq!(accepted.driver.as_deref(), Some("d-1"));
        assert_eq!(accepted.version, 2);

        let events = drain(&mut passenger);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RideEvent::RideAccepted { ride } => assert_eq!(ride.driver.as_deref(), Some("d-1")),
            other => panic!("Expected RideAccepted, got {:?}", other),
        }
    }

    #[test]
    fn test_second_accept_is_conflict() {
        let (engine, _, _) = engine();
        let ride = engine.request_ride("p-1", "A", "B");

        engine.accept_ride("d-1", &ride.id).unwrap();
        let err = engine.accept_ride("d-2", &ride.id).unwrap_err();
        assert!(matches!(err, DispatchError::Conflict { .. }));

        // The winner's assignment is untouched
        let stored = engine.store.get(&ride.id).unwrap();
        assert_eq!(stored.driver.as_deref(), Some("d-1"));
        assert_eq!(stored.version, 2);
    }

    #[test]
    fn test_accept_on_terminal_ride_is_invalid_transition() {
        let (engine, _, _) = engine();
        let ride = engine.request_ride("p-1", "A", "B");
        engine.accept_ride("d-1", &ride.id).unwrap();
        engine.complete_ride("d-1", &ride.id).unwrap();

        let err = engine.accept_ride("d-2", &ride.id).unwrap_err();
        assert_eq!(
            err,
            DispatchError::InvalidTransition {
                from: RideState::Completed,
                to: RideState::Accepted,
            }
        );
        // Stored state unchanged
        let stored = engine.store.get(&ride.id).unwrap();
        assert_eq!(stored.state, RideState::Completed);
        assert_eq!(stored.version, 3);
    }

    #[test]
    fn test_accept_unknown_ride() {
        let (engine, _, _) = engine();
        assert!(matches!(
            engine.accept_ride("d-1", "missing"),
            Err(DispatchError::NotFound(_))
        ));
    }

    #[test]
    fn test_passenger_cancel_requested() {
        let (engine, registry, _) = engine();
        let mut driver = open_driver(&registry, "d-1");
        let ride = engine.request_ride("p-1", "A", "B");
        drain(&mut driver); // offer

        let cancelled = engine
            .cancel_ride(CancelActor::Passenger("p-1".into()), &ride.id)
            .unwrap();
        assert_eq!(cancelled.state, RideState::Cancelled);
        assert_eq!(cancelled.version, 2);

        // The open offer is withdrawn from driver screens
        let events = drain(&mut driver);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RideEvent::RideWithdrawn { .. }));
    }

    #[test]
    fn test_foreign_passenger_cannot_cancel() {
        let (engine, _, _) = engine();
        let ride = engine.request_ride("p-1", "A", "B");

        let err = engine
            .cancel_ride(CancelActor::Passenger("p-2".into()), &ride.id)
            .unwrap_err();
        assert_eq!(err, DispatchError::Unauthorized);
        assert_eq!(engine.store.get(&ride.id).unwrap().state, RideState::Requested);
    }

    #[test]
    fn test_unassigned_driver_cannot_cancel() {
        let (engine, _, _) = engine();
        let ride = engine.request_ride("p-1", "A", "B");
        engine.accept_ride("d-1", &ride.id).unwrap();

        let err = engine
            .cancel_ride(CancelActor::Driver("d-2".into()), &ride.id)
            .unwrap_err();
        assert_eq!(err, DispatchError::Unauthorized);
    }

    #[test]
    fn test_assigned_driver_cancel_notifies_passenger() {
        let (engine, registry, _) = engine();
        let ride = engine.request_ride("p-1", "A", "B");
        let mut passenger = open_ride(&registry, &ride.id, "p-1");
        engine.accept_ride("d-1", &ride.id).unwrap();
        drain(&mut passenger); // accepted

        engine
            .cancel_ride(CancelActor::Driver("d-1".into()), &ride.id)
            .unwrap();

        let events = drain(&mut passenger);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RideEvent::RideCancelled { .. }));
    }

    #[test]
    fn test_cancel_terminal_ride_is_invalid_transition() {
        let (engine, _, _) = engine();
        let ride = engine.request_ride("p-1", "A", "B");
        engine
            .cancel_ride(CancelActor::Passenger("p-1".into()), &ride.id)
            .unwrap();

        let err = engine
            .cancel_ride(CancelActor::Passenger("p-1".into()), &ride.id)
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::InvalidTransition {
                from: RideState::Cancelled,
                to: RideState::Cancelled,
            }
        );
    }

    #[test]
    fn test_complete_requires_assignment() {
        let (engine, _, _) = engine();
        let ride = engine.request_ride("p-1", "A", "B");
        engine.accept_ride("d-1", &ride.id).unwrap();

        assert_eq!(
            engine.complete_ride("d-2", &ride.id).unwrap_err(),
            DispatchError::Unauthorized
        );
    }

    #[test]
    fn test_complete_from_requested_is_invalid_transition() {
        let (engine, _, _) = engine();
        let ride = engine.request_ride("p-1", "A", "B");

        let err = engine.complete_ride("d-1", &ride.id).unwrap_err();
        assert_eq!(
            err,
            DispatchError::InvalidTransition {
                from: RideState::Requested,
                to: RideState::Completed,
            }
        );
        assert_eq!(engine.store.get(&ride.id).unwrap().version, 1);
    }

    #[test]
    fn test_version_increments_once_per_transition() {
        let (engine, _, _) = engine();
        let ride = engine.request_ride("p-1", "A", "B");
        assert_eq!(ride.version, 1);

        let accepted = engine.accept_ride("d-1", &ride.id).unwrap();
        assert_eq!(accepted.version, 2);

        let completed = engine.complete_ride("d-1", &ride.id).unwrap();
        assert_eq!(completed.version, 3);
    }

    #[test]
    fn test_passenger_event_order_follows_commits() {
        let (engine, registry, _) = engine();
        let ride = engine.request_ride("p-1", "A", "B");
        let mut passenger = open_ride(&registry, &ride.id, "p-1");

        engine.accept_ride("d-1", &ride.id).unwrap();
        engine.complete_ride("d-1", &ride.id).unwrap();

        let first = passenger.rx.try_recv().unwrap();
        let second = passenger.rx.try_recv().unwrap();
        assert_eq!(first.seq, 1);
        assert!(matches!(first.event, RideEvent::RideAccepted { .. }));
        assert_eq!(second.seq, 2);
        assert!(matches!(second.event, RideEvent::RideCompleted { .. }));
    }

    #[test]
    fn test_expire_stale_offers() {
        let (engine, registry, _) = engine_with(Duration::from_millis(1));
        let ride = engine.request_ride("p-1", "A", "B");
        let mut passenger = open_ride(&registry, &ride.id, "p-1");

        let taken = engine.request_ride("p-1", "C", "D");
        engine.accept_ride("d-1", &taken.id).unwrap();

        std::thread::sleep(Duration::from_millis(10));
        let expired = engine.expire_stale_offers();
        assert_eq!(expired, 1);

        assert_eq!(engine.store.get(&ride.id).unwrap().state, RideState::Cancelled);
        // Accepted rides are never expired
        assert_eq!(engine.store.get(&taken.id).unwrap().state, RideState::Accepted);

        let events = drain(&mut passenger);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RideEvent::RideCancelled { .. }));
    }

    #[test]
    fn test_open_channel_driver_own_subject() {
        let (engine, _, auth) = engine();
        let token = auth.login("+2", "pw").unwrap();

        let conn = engine.open_channel("d-1", &token).unwrap();
        assert_eq!(conn.subject, SubjectId::Driver("d-1".into()));
    }

    #[test]
    fn test_open_channel_foreign_driver_refused() {
        let (engine, _, auth) = engine();
        let token = auth.login("+3", "pw").unwrap(); // d-2's token

        assert_eq!(
            engine.open_channel("d-1", &token).unwrap_err(),
            DispatchError::Unauthorized
        );
    }

    #[test]
    fn test_open_channel_passenger_own_ride() {
        let (engine, _, auth) = engine();
        let ride = engine.request_ride("p-1", "A", "B");
        let token = auth.login("+1", "pw").unwrap();

        let conn = engine.open_channel(&ride.id, &token).unwrap();
        assert_eq!(conn.subject, SubjectId::Ride(ride.id));
    }

    #[test]
    fn test_open_channel_foreign_ride_refused() {
        let (engine, _, auth) = engine();
        let ride = engine.request_ride("p-2", "A", "B");
        let token = auth.login("+1", "pw").unwrap(); // p-1's token

        assert_eq!(
            engine.open_channel(&ride.id, &token).unwrap_err(),
            DispatchError::Unauthorized
        );
    }

    #[test]
    fn test_open_channel_bad_token() {
        let (engine, _, _) = engine();
        assert_eq!(
            engine.open_channel("d-1", "bogus").unwrap_err(),
            DispatchError::Unauthorized
        );
    }
}
