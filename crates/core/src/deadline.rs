//! Shared job deadline.
//!
//! Computed once when a run starts; every phase that can block asks it for
//! the time remaining instead of using its own fixed timeout, so a slow
//! build phase shortens the execution allowance.

use std::time::{Duration, Instant};

/// Absolute point in time by which a run must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Deadline at a fixed instant.
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    /// Time left before the deadline (zero once it has passed).
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// `min(cap, remaining)`, for short side calls such as catalog probes.
    pub fn remaining_capped(&self, cap: Duration) -> Duration {
        self.remaining().min(cap)
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
