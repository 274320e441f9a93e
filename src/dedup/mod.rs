//! Request coalescing.
//!
//! # Responsibilities
//! - Collapse concurrent identical outbound calls into one in-flight operation
//! - Hand every coalesced caller the same outcome, success or failure
//! - Keep a settled outcome for a short grace window so a burst still coalesces
//!
//! # Design Decisions
//! - Keyed by a fingerprint of method, path and body (`request_key`)
//! - The operation runs on its own task: a caller that stops waiting cannot
//!   cancel the call for everyone else
//! - No retries, no auth, no caching beyond the grace window

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::Method;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{SessionError, SessionResult};
use crate::observability::metrics;

/// Deterministic fingerprint of an outbound request.
///
/// Bodies are hashed so credentials in login payloads never sit in the map or
/// in logs.
pub fn request_key(method: &Method, path: &str, body: Option<&Value>) -> String {
    match body {
        None => format!("{} {}", method, path),
        Some(body) => {
            // serde_json's default map is ordered, so equal bodies serialize equally.
            let digest = Sha256::digest(body.to_string().as_bytes());
            format!("{} {} {}", method, path, hex::encode(digest))
        }
    }
}

type SharedOutcome<T> = Shared<BoxFuture<'static, SessionResult<T>>>;

struct PendingCall<T: Clone> {
    id: u64,
    result: SharedOutcome<T>,
}

/// Single-flight map of pending calls.
pub struct RequestDeduplicator<T: Clone> {
    pending: Arc<DashMap<String, PendingCall<T>>>,
    grace: Duration,
    next_id: AtomicU64,
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(grace: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            grace,
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `operation` unless a call with the same key is pending or settled
    /// within the grace window, in which case its outcome is returned instead.
    pub async fn execute<F, Fut>(&self, key: impl Into<String>, operation: F) -> SessionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SessionResult<T>> + Send + 'static,
    {
        let key = key.into();

        let shared = match self.pending.entry(key.clone()) {
            Entry::Occupied(entry) => {
                tracing::debug!(key = %key, "Coalescing onto pending call");
                metrics::record_dedup("coalesced");
                entry.get().result.clone()
            }
            Entry::Vacant(entry) => {
                metrics::record_dedup("issued");
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let pending = Arc::clone(&self.pending);
                let grace = self.grace;
                let cleanup_key = key.clone();
                let operation = operation();

                let task = tokio::spawn(async move {
                    let outcome = operation.await;
                    tokio::spawn(async move {
                        tokio::time::sleep(grace).await;
                        pending.remove_if(&cleanup_key, |_, call| call.id == id);
                    });
                    outcome
                });

                let result = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(SessionError::Internal(format!("coalesced call failed: {}", e)))
                    })
                }
                .boxed()
                .shared();

                entry.insert(PendingCall {
                    id,
                    result: result.clone(),
                });
                result
            }
        };

        shared.await
    }

    /// Stop coalescing onto anything issued so far. Calls already running
    /// still complete for the callers waiting on them.
    pub fn forget_all(&self) {
        self.pending.clear();
    }

    /// Number of keys currently pending or inside their grace window.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
