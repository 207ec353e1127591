// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ride records and lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Opaque ride identifier (UUID v4 string).
pub type RideId = String;

/// Opaque user identifier (passenger or driver).
pub type UserId = String;

/// Lifecycle state of a ride.
///
/// Legal edges: `requested -> accepted -> completed`,
/// `requested -> cancelled`, `accepted -> cancelled`.
/// `cancelled` and `completed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideState {
    Requested,
    Accepted,
    Cancelled,
    Completed,
}

impl RideState {
    /// Whether `self -> to` is a legal state-machine edge.
    pub fn can_transition_to(self, to: RideState) -> bool {
        matches!(
            (self, to),
            (RideState::Requested, RideState::Accepted)
                | (RideState::Requested, RideState::Cancelled)
                | (RideState::Accepted, RideState::Completed)
                | (RideState::Accepted, RideState::Cancelled)
        )
    }

    /// Whether the state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, RideState::Cancelled | RideState::Completed)
    }
}

impl fmt::Display for RideState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::Accepted => "accepted",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

/// A ride record.
///
/// The store is the only writer of `state`/`driver`/`version`; everyone else
/// sees snapshots. Once `accepted`, `driver` is immutable for the ride's
/// remaining lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    /// Unique ride id.
    pub id: RideId,

    /// Requesting passenger.
    pub passenger: UserId,

    /// Pickup location (opaque).
    pub pickup: String,

    /// Destination (opaque).
    pub destination: String,

    /// Current lifecycle state.
    pub state: RideState,

    /// Assigned driver, present only once accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<UserId>,

    /// Creation timestamp (milliseconds since epoch).
    pub created_at_ms: u64,

    /// Last transition timestamp (milliseconds since epoch).
    pub updated_at_ms: u64,

    /// Monotonically increasing version, +1 per committed transition.
    pub version: u64,
}

impl Ride {
    /// Create a fresh `requested` ride at version 1.
    pub fn new(
        id: impl Into<RideId>,
        passenger: impl Into<UserId>,
        pickup: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            passenger: passenger.into(),
            pickup: pickup.into(),
            destination: destination.into(),
            state: RideState::Requested,
            driver: None,
            created_at_ms: now,
            updated_at_ms: now,
            version: 1,
        }
    }

    /// Age of the ride relative to `now` (milliseconds since epoch).
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at_ms)
    }
}

/// Current wall-clock time as milliseconds since epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_edges() {
        use RideState::*;

        assert!(Requested.can_transition_to(Accepted));
        assert!(Requested.can_transition_to(Cancelled));
        assert!(Accepted.can_transition_to(Completed));
        assert!(Accepted.can_transition_to(Cancelled));
    }

    #[test]
    fn test_illegal_edges() {
        use RideState::*;

        assert!(!Requested.can_transition_to(Completed));
        assert!(!Requested.can_transition_to(Requested));
        assert!(!Accepted.can_transition_to(Requested));
        assert!(!Accepted.can_transition_to(Accepted));
        for from in [Cancelled, Completed] {
            for to in [Requested, Accepted, Cancelled, Completed] {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RideState::Requested.is_terminal());
        assert!(!RideState::Accepted.is_terminal());
        assert!(RideState::Cancelled.is_terminal());
        assert!(RideState::Completed.is_terminal());
    }

    #[test]
    fn test_new_ride() {
        let ride = Ride::new("r-1", "p-1", "Point A", "Point B");
        assert_eq!(ride.state, RideState::Requested);
        assert_eq!(ride.version, 1);
        assert!(ride.driver.is_none());
        assert_eq!(ride.created_at_ms, ride.updated_at_ms);
    }

    #[test]
    fn test_snapshot_serialization() {
        let ride = Ride::new("r-1", "p-1", "Point A", "Point B");
        let json = serde_json::to_string(&ride).unwrap();
        assert!(json.contains("\"state\":\"requested\""));
        // Unassigned driver is omitted from the snapshot
        assert!(!json.contains("driver"));

        let parsed: Ride = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, "r-1");
        assert_eq!(parsed.version, 1);
    }
}
