// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Notification Fan-out - committed transitions projected onto push channels.
//!
//! Pure translation layer: each committed transition maps to a set of
//! (subject, event) deliveries through the Connection Registry. Delivery is
//! fire-and-forget; ride-state truth lives in the store, and a disconnected
//! client cannot retroactively affect a transition that already committed.

use crate::event::RideEvent;
use crate::registry::{ConnectionRegistry, SubjectId};
use crate::ride::Ride;
use std::sync::Arc;

/// Who initiated a cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelActor {
    Passenger(String),
    Driver(String),
    /// Time-driven offer expiry.
    System,
}

/// Translates ride transitions into push deliveries.
pub struct Notifier {
    registry: Arc<ConnectionRegistry>,
}

impl Notifier {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Offer a fresh ride to every currently connected driver.
    ///
    /// The candidate set is the open driver channels at broadcast time;
    /// drivers connecting later miss earlier offers (no replay).
    pub fn offer_broadcast(&self, ride: &Ride) {
        let drivers = self.registry.list_open_drivers();
        log::debug!("Offering ride {} to {} drivers", ride.id, drivers.len());
        for driver in drivers {
            self.registry.send(
                &SubjectId::Driver(driver),
                RideEvent::RideAvailable { ride: ride.clone() },
            );
        }
    }

    /// The ride was accepted: confirm to the passenger, withdraw the offer
    /// from every other driver.
    pub fn accept_committed(&self, ride: &Ride) {
        self.registry.send(
            &SubjectId::Ride(ride.id.clone()),
            RideEvent::RideAccepted { ride: ride.clone() },
        );

        for driver in self.registry.list_open_drivers() {
            if ride.driver.as_deref() == Some(driver.as_str()) {
                continue;
            }
            self.registry.send(
                &SubjectId::Driver(driver),
                RideEvent::RideWithdrawn { ride: ride.clone() },
            );
        }
    }

    /// The ride was cancelled: tell the counterpart of the actor, and drop
    /// the open offer from driver screens when the ride was still unclaimed.
    pub fn cancel_committed(&self, ride: &Ride, was_requested: bool, actor: &CancelActor) {
        match actor {
            CancelActor::Passenger(_) => {
                if let Some(driver) = &ride.driver {
                    self.registry.send(
                        &SubjectId::Driver(driver.clone()),
                        RideEvent::RideCancelled { ride: ride.clone() },
                    );
                }
            }
            CancelActor::Driver(_) | CancelActor::System => {
                self.registry.send(
                    &SubjectId::Ride(ride.id.clone()),
                    RideEvent::RideCancelled { ride: ride.clone() },
                );
            }
        }

        if was_requested {
            for driver in self.registry.list_open_drivers() {
                self.registry.send(
                    &SubjectId::Driver(driver),
                    RideEvent::RideWithdrawn { ride: ride.clone() },
                );
            }
        }
    }

    /// The ride was completed: tell the passenger.
    pub fn complete_committed(&self, ride: &Ride) {
        self.registry.send(
            &SubjectId::Ride(ride.id.clone()),
            RideEvent::RideCompleted { ride: ride.clone() },
        );
    }
}
