//! Rate limiting for caller-visible partial updates.
//!
//! Coalescing semantics: the leading call is admitted immediately, calls
//! inside the minimum interval are suppressed (their state is expected to
//! be superseded by a later call), and the terminal state must be published
//! unconditionally by the caller once the stream completes.

use std::time::{Duration, Instant};

/// Minimum-spacing admission gate over caller-supplied instants.
///
/// Taking `now` as a parameter keeps the type deterministic under test.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_admitted: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_admitted: None,
        }
    }

    /// Whether an update at `now` may be published. The first call always
    /// passes; later calls pass once `min_interval` has elapsed since the
    /// last admitted one.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last_admitted {
            Some(previous) if now.duration_since(previous) < self.min_interval => false,
            _ => {
                self.last_admitted = Some(now);
                true
            }
        }
    }

    /// Forget the last admission, so the next call passes immediately.
    pub fn reset(&mut self) {
        self.last_admitted = None;
    }
}
