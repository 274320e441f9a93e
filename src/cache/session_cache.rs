//! Per-identity subscription cache with background healing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::auth::session::SessionContext;
use crate::cache::entity::{CachedEntity, Subscription, VerifyUserResponse};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::{SessionError, SessionResult};
use crate::observability::metrics;
use crate::resilience::{AttemptGate, GateDecision};
use crate::storage::KeyValueStore;

/// Where subscription data comes from. The client implements this on top of
/// its deduplicated, refresh-aware transport.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// `Ok(None)` means the backend answered with an empty body.
    async fn fetch_subscription(&self) -> SessionResult<Option<VerifyUserResponse>>;
}

fn record_key(identity_id: &str) -> String {
    format!("user_data:{}", identity_id)
}

struct HealState {
    gate: AttemptGate,
    in_flight: bool,
}

struct CacheInner {
    store: Arc<dyn KeyValueStore>,
    source: Arc<dyn SubscriptionSource>,
    context: Arc<SessionContext>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    heal: Mutex<HashMap<String, HealState>>,
}

/// Durable subscription cache. Clones share state.
#[derive(Clone)]
pub struct SessionDataCache {
    inner: Arc<CacheInner>,
}

impl SessionDataCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        source: Arc<dyn SubscriptionSource>,
        context: Arc<SessionContext>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                source,
                context,
                clock,
                config,
                heal: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn lock_heal(&self) -> MutexGuard<'_, HashMap<String, HealState>> {
        self.inner
            .heal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve the entry for `identity_id` only if it belongs to the active
    /// session, is within TTL and validates. A present but unusable entry
    /// schedules a background heal.
    pub fn get(&self, identity_id: &str) -> Option<CachedEntity<Subscription>> {
        if !self.inner.context.is_active(identity_id) {
            metrics::record_cache_lookup("foreign");
            return None;
        }

        let entry = match self.load(identity_id) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                metrics::record_cache_lookup("miss");
                return None;
            }
            Err(e) => {
                metrics::record_cache_lookup("corrupt");
                tracing::warn!(identity = %identity_id, error = %e, "Discarding corrupt cache entry");
                if let Err(e) = self.inner.store.remove(&record_key(identity_id)) {
                    tracing::warn!(identity = %identity_id, error = %e, "Failed to remove corrupt cache entry");
                }
                self.schedule_heal(identity_id);
                return None;
            }
        };

        if entry.identity_id != identity_id || !entry.value.is_valid() {
            metrics::record_cache_lookup("invalid");
            tracing::warn!(identity = %identity_id, "Cache entry failed validation");
            self.schedule_heal(identity_id);
            return None;
        }

        let now = self.inner.clock.now_millis();
        if !entry.is_fresh(now, self.inner.config.ttl()) {
            metrics::record_cache_lookup("expired");
            tracing::debug!(
                identity = %identity_id,
                age_ms = entry.age_ms(now),
                "Cache entry expired"
            );
            self.schedule_heal(identity_id);
            return None;
        }

        metrics::record_cache_lookup("hit");
        Some(entry)
    }

    /// Fetch from the backend and persist the result. On failure the previous
    /// entry stays as it was; a fatal failure removes it.
    pub async fn refresh(&self, identity_id: &str) -> SessionResult<CachedEntity<Subscription>> {
        if !self.inner.context.is_active(identity_id) {
            return Err(SessionError::IdentityMismatch {
                requested: identity_id.to_string(),
            });
        }

        let response = match self.inner.source.fetch_subscription().await {
            Ok(response) => response,
            Err(e) => {
                if e.is_fatal() {
                    self.clear(identity_id);
                }
                tracing::warn!(identity = %identity_id, error = %e, "Subscription fetch failed");
                return Err(e);
            }
        };

        // The session may have changed hands while the fetch was in flight.
        if !self.inner.context.is_active(identity_id) {
            tracing::info!(identity = %identity_id, "Discarding subscription fetched for a previous identity");
            return Err(SessionError::IdentityMismatch {
                requested: identity_id.to_string(),
            });
        }

        let value = Subscription::from_response(response);
        if !value.is_valid() {
            return Err(SessionError::Decode(format!(
                "subscription with status '{}' has no variant",
                value.status
            )));
        }

        let entry = CachedEntity::new(value, self.inner.clock.now_millis(), identity_id);
        let encoded = serde_json::to_string(&entry)?;
        if let Err(e) = self.inner.store.put(&record_key(identity_id), encoded) {
            tracing::warn!(identity = %identity_id, error = %e, "Failed to persist cache entry");
        }
        tracing::debug!(identity = %identity_id, status = %entry.value.status, "Subscription cached");
        Ok(entry)
    }

    /// Remove the persisted entry and heal history for `identity_id`.
    pub fn clear(&self, identity_id: &str) {
        if let Err(e) = self.inner.store.remove(&record_key(identity_id)) {
            tracing::warn!(identity = %identity_id, error = %e, "Failed to clear cache entry");
        }
        self.lock_heal().remove(identity_id);
    }

    /// Forget heal history for every identity.
    pub fn reset_heal(&self) {
        self.lock_heal().clear();
    }

    /// Heal attempts for `identity_id` since its last successful heal.
    pub fn heal_attempts(&self, identity_id: &str) -> u32 {
        self.lock_heal()
            .get(identity_id)
            .map(|s| s.gate.attempts())
            .unwrap_or(0)
    }

    fn load(&self, identity_id: &str) -> SessionResult<Option<CachedEntity<Subscription>>> {
        let Some(raw) = self.inner.store.get(&record_key(identity_id))? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| SessionError::CacheCorrupt(e.to_string()))
    }

    fn schedule_heal(&self, identity_id: &str) {
        let now = self.inner.clock.now_millis();
        let mut heal = self.lock_heal();
        let state = heal
            .entry(identity_id.to_string())
            .or_insert_with(|| HealState {
                gate: AttemptGate::new(self.inner.config.heal_policy()),
                in_flight: false,
            });

        if state.in_flight {
            return;
        }
        match state.gate.check(now) {
            GateDecision::Open => {}
            GateDecision::CoolingDown { .. } | GateDecision::Exhausted { .. } => {
                metrics::record_heal("gated");
                return;
            }
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime available, skipping cache heal");
            return;
        };

        state.gate.record_attempt(now);
        state.in_flight = true;
        tracing::debug!(identity = %identity_id, attempt = state.gate.attempts(), "Healing cache entry");

        let this = self.clone();
        let identity_id = identity_id.to_string();
        runtime.spawn(async move {
            let succeeded = this.refresh(&identity_id).await.is_ok();
            this.finish_heal(&identity_id, succeeded);
        });
    }

    fn finish_heal(&self, identity_id: &str, succeeded: bool) {
        let mut heal = self.lock_heal();
        // Cleared while healing: nothing to record.
        let Some(state) = heal.get_mut(identity_id) else {
            return;
        };
        state.in_flight = false;
        if succeeded {
            state.gate.record_success();
            metrics::record_heal("success");
        } else {
            metrics::record_heal("failure");
        }
    }
}
