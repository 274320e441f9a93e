//! Client-side session consistency layer.
//!
//! # Architecture Overview
//!
//! ```text
//!  UI code
//!     │
//!     ▼
//!  SessionClient ── login / logout / restore / get / post / subscription
//!     │                                   │
//!     ▼                                   ▼
//!  RequestDeduplicator               SessionDataCache
//!  (one call per key)                (TTL, identity check, heal)
//!     │                                   │
//!     ▼                                   │ verify-user via the same path
//!  Transport (reqwest) ◀─────────────────┘
//!     │  401
//!     ▼
//!  RefreshCoordinator
//!  (one refresh, FIFO waiters, attempt gate)
//!     │
//!     ▼
//!  storage: credential slot, user_data:{identity}
//! ```

// Core
pub mod auth;
pub mod cache;
pub mod client;
pub mod dedup;
pub mod transport;

// Infrastructure
pub mod clock;
pub mod config;
pub mod error;
pub mod observability;
pub mod resilience;
pub mod storage;

pub use auth::{Credential, Identity, RefreshCoordinator, SessionStatus};
pub use cache::{CachedEntity, SessionDataCache, Subscription};
pub use client::{SessionClient, SessionClientBuilder};
pub use config::SessionConfig;
pub use dedup::RequestDeduplicator;
pub use error::{SessionError, SessionResult};
