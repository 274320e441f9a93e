//! Session-scoped data cache.
//!
//! # Data Flow
//! ```text
//! get(identity)
//!     → identity check against SessionContext
//!     → storage record "user_data:{identity}"
//!     → TTL + validation
//!     → hit, or absent + background heal (gated per identity)
//!
//! refresh(identity)
//!     → SubscriptionSource (deduplicated, refresh-aware call)
//!     → normalise, validate, persist with a new fetched_at
//! ```
//!
//! # Design Decisions
//! - "No subscription" is a value, a failed fetch is not
//! - An entry is never served to an identity other than the one it was
//!   fetched for, expired or not
//! - Heal attempts use their own gate, separate from credential refresh

pub mod entity;
pub mod session_cache;

pub use entity::{CachedEntity, Subscription, VerifyUserResponse, NO_SUBSCRIPTION};
pub use session_cache::{SessionDataCache, SubscriptionSource};
