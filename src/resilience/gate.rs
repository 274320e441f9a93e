//! Attempt gate for self-healing operations.
//!
//! # States
//! - Open: an attempt may start
//! - Cooling down: the last attempt started less than `cooldown_ms` ago,
//!   whatever its outcome
//! - Exhausted: `max_attempts` consecutive failures, rejected until
//!   `exhausted_lockout_ms` has passed since the last attempt
//!
//! # State Transitions
//! ```text
//! Open → Cooling down: attempt starts
//! Cooling down → Open: cooldown elapses
//! any → Exhausted: failures >= max_attempts
//! Exhausted → Open: lockout elapses (counter starts over) or reset()
//! success: counter back to 0, cooldown still applies
//! ```
//!
//! The gate holds no lock of its own; owners keep it inside the mutex that
//! guards the rest of their state.

use crate::config::RefreshPolicy;

/// Outcome of asking the gate for permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Open,
    CoolingDown { retry_after_ms: u64 },
    Exhausted { attempts: u32, retry_after_ms: u64 },
}

/// Attempt counter with cooldown and lockout.
#[derive(Debug, Clone)]
pub struct AttemptGate {
    policy: RefreshPolicy,
    attempts: u32,
    last_attempt_at: Option<u64>,
}

impl AttemptGate {
    pub fn new(policy: RefreshPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            last_attempt_at: None,
        }
    }

    /// Check whether an attempt may start at `now_ms`.
    pub fn check(&mut self, now_ms: u64) -> GateDecision {
        let elapsed = self
            .last_attempt_at
            .map(|at| now_ms.saturating_sub(at))
            .unwrap_or(u64::MAX);

        if self.is_exhausted() {
            if elapsed < self.policy.exhausted_lockout_ms {
                return GateDecision::Exhausted {
                    attempts: self.attempts,
                    retry_after_ms: self.policy.exhausted_lockout_ms - elapsed,
                };
            }
            // Lockout served: start a new window.
            self.attempts = 0;
        }

        if elapsed < self.policy.cooldown_ms {
            return GateDecision::CoolingDown {
                retry_after_ms: self.policy.cooldown_ms - elapsed,
            };
        }

        GateDecision::Open
    }

    /// Record the start of an attempt.
    pub fn record_attempt(&mut self, now_ms: u64) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(now_ms);
    }

    /// Failures are counted by `record_attempt`; only success clears them.
    pub fn record_success(&mut self) {
        self.attempts = 0;
    }

    /// Forget all history (identity change).
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_attempt_at = None;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_attempt_at(&self) -> Option<u64> {
        self.last_attempt_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }
}
