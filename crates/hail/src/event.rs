// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Push-event taxonomy for ride notifications.
//!
//! Events are JSON-encoded with a `type` tag so clients can match
//! exhaustively on the event kind instead of sniffing payload fields.

use crate::ride::Ride;
use serde::{Deserialize, Serialize};

/// Server -> client push events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RideEvent {
    /// Sent once when a channel opens.
    Welcome { version: String },

    /// A new ride is open for accept (drivers only).
    RideAvailable { ride: Ride },

    /// A previously offered ride is no longer available (drivers only).
    RideWithdrawn { ride: Ride },

    /// The ride was accepted; the snapshot names the assigned driver.
    RideAccepted { ride: Ride },

    /// The ride was cancelled.
    RideCancelled { ride: Ride },

    /// The ride was completed.
    RideCompleted { ride: Ride },
}

impl RideEvent {
    /// Create a welcome event carrying the server version.
    pub fn welcome() -> Self {
        Self::Welcome {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Ride snapshot carried by the event, if any.
    pub fn ride(&self) -> Option<&Ride> {
        match self {
            Self::Welcome { .. } => None,
            Self::RideAvailable { ride }
            | Self::RideWithdrawn { ride }
            | Self::RideAccepted { ride }
            | Self::RideCancelled { ride }
            | Self::RideCompleted { ride } => Some(ride),
        }
    }
}

/// Sequence-stamped delivery envelope.
///
/// `seq` increases by 1 per event on a given connection so the receiving
/// client can detect gaps or reordering; the transport itself is expected to
/// preserve order on a single connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,

    #[serde(flatten)]
    pub event: RideEvent,
}
