//! Session credential subsystem.
//!
//! # Data Flow
//! ```text
//! /auth/login response cookies
//!     → credential.rs (Credential + durable slot)
//!     → coordinator.rs (owns the live credential, single-flight refresh)
//!     → session.rs (active identity, status channel)
//!
//! 401 from any call
//!     → RefreshCoordinator::on_unauthorized
//!     → one POST /auth/refresh, replay once
//! ```
//!
//! # Design Decisions
//! - The coordinator is the only writer of the credential slot
//! - Credential generations identify exactly which credential a 401 rejected

pub mod coordinator;
pub mod credential;
pub mod session;

pub use coordinator::RefreshCoordinator;
pub use credential::{Credential, CredentialStore};
pub use session::{Identity, SessionContext, SessionStatus};
