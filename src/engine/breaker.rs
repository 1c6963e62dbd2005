//! Per-source circuit breaker.
//!
//! Counts consecutive failures. At the threshold the breaker opens and
//! blocks calls until the cooldown has elapsed; the next call after that
//! is let through as a single trial (half-open). The breaker stays open
//! until the trial resolves: success closes it, failure re-arms the
//! cooldown, and an abandoned trial leaves it as it was.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerState {
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub is_open: bool,
}

/// What the breaker decided for an incoming call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Closed; call normally.
    Allow,
    /// Cooldown elapsed; one trial call goes through.
    HalfOpen,
    /// Still cooling down; do not call.
    Reject,
}

impl CircuitBreakerState {
    /// Decide whether a call may proceed at `now`. Does not change state.
    pub fn check(&self, now: DateTime<Utc>, cooldown: Duration) -> BreakerDecision {
        if !self.is_open {
            return BreakerDecision::Allow;
        }
        match self.last_failure_at {
            Some(at) if now - at < cooldown => BreakerDecision::Reject,
            _ => BreakerDecision::HalfOpen,
        }
    }

    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.is_open = false;
    }

    /// Count a failure. Returns `true` when this failure opened the
    /// breaker or, for a failed trial call, restarted its cooldown.
    pub fn record_failure(&mut self, now: DateTime<Utc>, threshold: u32) -> bool {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);
        if self.is_open {
            return true;
        }
        if self.failure_count >= threshold {
            self.is_open = true;
            return true;
        }
        false
    }

    /// Time left before a call is let through again.
    pub fn remaining_cooldown(&self, now: DateTime<Utc>, cooldown: Duration) -> Option<Duration> {
        if !self.is_open {
            return None;
        }
        let at = self.last_failure_at?;
        let left = cooldown - (now - at);
        (left > Duration::zero()).then_some(left)
    }
}
