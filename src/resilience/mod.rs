//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call:
//!     → transport timeout (reqwest, per request)
//!     → On transport failure: retries.rs (idempotent only, backoff.rs delays)
//!
//! Credential refresh / cache heal:
//!     → gate.rs (attempt cap, cooldown after failure, lockout once exhausted)
//! ```
//!
//! # Design Decisions
//! - Timeouts belong to the transport; nothing here adds another deadline
//! - Retries only for idempotent requests (GET, HEAD, OPTIONS)
//! - Jittered backoff prevents thundering herd
//! - The attempt gate is the request-storm circuit breaker for refreshes

pub mod backoff;
pub mod gate;
pub mod retries;

pub use gate::{AttemptGate, GateDecision};
