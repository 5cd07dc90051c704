//! Retry backoff ladder for a subscription consumer.
//!
//! Each retriable failure moves one rung up the fixed ladder
//! `0 → 3 s → 30 s → 5 min → 1 h → 24 h`; at the top the delay stays at 24 h.
//! Only a successful delivery resets it to the base rung.

use std::time::Duration;

use beacon_core::defaults::BACKOFF_LADDER_MS;

/// Current position on the backoff ladder. Owned by exactly one consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backoff {
    rung: usize,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current delay in milliseconds.
    pub fn current_ms(&self) -> u64 {
        BACKOFF_LADDER_MS[self.rung]
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms())
    }

    /// Move one rung up (clamped at the top) and return the new delay.
    pub fn advance(&mut self) -> Duration {
        if self.rung + 1 < BACKOFF_LADDER_MS.len() {
            self.rung += 1;
        }
        self.current()
    }

    /// Back to the base rung after a successful delivery.
    pub fn reset(&mut self) {
        self.rung = 0;
    }

    pub fn is_base(&self) -> bool {
        self.rung == 0
    }

    pub fn is_at_ceiling(&self) -> bool {
        self.rung + 1 == BACKOFF_LADDER_MS.len()
    }
}
