//! Cached values and the subscription model.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status reported when the user has no subscription.
pub const NO_SUBSCRIPTION: &str = "none";

/// A cached value stamped with when and for whom it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntity<T> {
    pub value: T,
    /// Milliseconds since the Unix epoch.
    pub fetched_at: u64,
    pub identity_id: String,
}

impl<T> CachedEntity<T> {
    pub fn new(value: T, fetched_at: u64, identity_id: impl Into<String>) -> Self {
        Self {
            value,
            fetched_at,
            identity_id: identity_id.into(),
        }
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.fetched_at)
    }

    /// Fresh until `ttl` has fully elapsed.
    pub fn is_fresh(&self, now_ms: u64, ttl: Duration) -> bool {
        u128::from(self.age_ms(now_ms)) <= ttl.as_millis()
    }
}

/// Raw body of `GET /user/verify-user`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VerifyUserResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub variant_id: Option<i64>,
}

/// Subscription state of the active user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub status: String,
    pub product_id: Option<i64>,
    pub variant_id: Option<i64>,
}

impl Subscription {
    /// The explicit "no subscription" value. Valid and cacheable.
    pub fn none() -> Self {
        Self {
            status: NO_SUBSCRIPTION.to_string(),
            product_id: None,
            variant_id: None,
        }
    }

    /// Normalise a verify-user response. An absent body means no subscription;
    /// empty status and zero ids mean absent.
    pub fn from_response(response: Option<VerifyUserResponse>) -> Self {
        let Some(response) = response else {
            return Self::none();
        };
        let status = response
            .status
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| NO_SUBSCRIPTION.to_string());
        Self {
            status,
            product_id: response.product_id.filter(|id| *id != 0),
            variant_id: response.variant_id.filter(|id| *id != 0),
        }
    }

    pub fn is_none(&self) -> bool {
        self.status == NO_SUBSCRIPTION
    }

    /// Only valid values are persisted: a status, and a variant unless the
    /// status is `none`.
    pub fn is_valid(&self) -> bool {
        !self.status.is_empty() && (self.is_none() || self.variant_id.is_some())
    }
}
