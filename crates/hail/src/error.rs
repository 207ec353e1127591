// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for dispatch operations.

use crate::ride::{RideId, RideState};
use std::fmt;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors surfaced by the dispatch coordinator.
///
/// `Conflict` is deliberately distinct from the other variants: it marks a
/// lost accept race (non-retryable, the ride is already claimed), so callers
/// can stop offering the ride instead of retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Bad or missing token, or the principal does not own the claimed subject.
    Unauthorized,

    /// Unknown ride id.
    NotFound(RideId),

    /// Compare-and-transition lost to a concurrent writer.
    Conflict {
        ride: RideId,
        /// State observed when the conflict was detected.
        state: RideState,
    },

    /// Requested transition is not a legal state-machine edge.
    InvalidTransition { from: RideState, to: RideState },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::NotFound(ride) => write!(f, "Ride not found: {}", ride),
            Self::Conflict { ride, state } => {
                write!(f, "Conflict on ride {}: already {}", ride, state)
            }
            Self::InvalidTransition { from, to } => {
                write!(f, "Invalid transition: {} -> {}", from, to)
            }
        }
    }
}

impl std::error::Error for DispatchError {}
