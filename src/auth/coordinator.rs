//! Single-flight credential refresh.
//!
//! # States
//! - Idle: no refresh running
//! - Refreshing: one `POST /auth/refresh` in flight; every caller that needs a
//!   new credential queues behind it instead of issuing its own
//!
//! # State Transitions
//! ```text
//! Idle → Refreshing: credential invalidated by a 401 (or revalidate), gate open
//! Refreshing → Idle (success): new credential installed, counter reset,
//!                              waiters released FIFO with it
//! Refreshing → Idle (failure): waiters released FIFO with the failure;
//!                              at the attempt cap the credential is dropped and
//!                              the failure becomes RefreshExhausted
//! ```
//!
//! # Design Decisions
//! - One refresh per invalidation episode: a 401 for a credential generation
//!   that was already rotated replays with the current credential, no refresh
//! - The refresh runs on its own task so a caller giving up cannot abort a
//!   rotation half way
//! - A replay that is rejected again is fatal (`AuthExpired`), never retried
//! - Requests carry the login epoch they were issued under; a 401 that arrives
//!   after a login or logout is answered with `SessionChanged`, never replayed
//!   with the newer session's credential

use arc_swap::ArcSwapOption;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use crate::auth::credential::{Credential, CredentialStore};
use crate::clock::Clock;
use crate::config::RefreshPolicy;
use crate::error::{SessionError, SessionResult};
use crate::observability::metrics;
use crate::resilience::{AttemptGate, GateDecision};
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Refresh endpoint.
pub const REFRESH_PATH: &str = "/auth/refresh";

type Waiter = oneshot::Sender<SessionResult<Arc<Credential>>>;

struct RefreshState {
    gate: AttemptGate,
    in_flight: bool,
    waiters: VecDeque<Waiter>,
    /// Generation the backend rejected; never handed out again.
    invalidated: Option<u64>,
    /// Bumped on login/logout so a refresh started for a previous identity
    /// cannot install its result.
    epoch: u64,
}

struct CoordinatorInner {
    transport: Arc<dyn Transport>,
    slots: CredentialStore,
    clock: Arc<dyn Clock>,
    credential: ArcSwapOption<Credential>,
    state: Mutex<RefreshState>,
    next_generation: AtomicU64,
}

/// Owner of the session credential. Clones share state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        slots: CredentialStore,
        clock: Arc<dyn Clock>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                transport,
                slots,
                clock,
                credential: ArcSwapOption::empty(),
                state: Mutex::new(RefreshState {
                    gate: AttemptGate::new(policy),
                    in_flight: false,
                    waiters: VecDeque::new(),
                    invalidated: None,
                    epoch: 0,
                }),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn stamp(&self, credential: Credential) -> Arc<Credential> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        Arc::new(credential.with_generation(generation))
    }

    /// The credential currently in use, if any.
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.inner.credential.load_full()
    }

    /// Install a credential obtained by login and persist it.
    pub fn install(&self, credential: Credential) -> Arc<Credential> {
        let credential = self.stamp(credential);
        {
            let mut state = self.lock_state();
            state.invalidated = None;
            self.inner.credential.store(Some(credential.clone()));
        }
        if let Err(e) = self.inner.slots.save_credential(&credential) {
            tracing::warn!(error = %e, "Failed to persist credential");
        }
        credential
    }

    /// Load the persisted credential, if one survives from a previous run.
    pub fn restore(&self) -> Option<Arc<Credential>> {
        let credential = self.inner.slots.load_credential()?;
        if credential.csrf_token().is_empty() {
            tracing::warn!("Persisted credential has no CSRF token, ignoring");
            if let Err(e) = self.inner.slots.clear_credential() {
                tracing::warn!(error = %e, "Failed to clear persisted credential");
            }
            return None;
        }
        let credential = self.stamp(credential);
        self.inner.credential.store(Some(credential.clone()));
        Some(credential)
    }

    /// Forget the credential after a fatal failure in the session started at
    /// `epoch`. A newer session is left alone. Attempt history is kept.
    pub fn drop_credential(&self, epoch: u64) -> bool {
        {
            let mut state = self.lock_state();
            if state.epoch != epoch {
                return false;
            }
            state.invalidated = None;
            self.inner.credential.store(None);
        }
        if let Err(e) = self.inner.slots.clear_credential() {
            tracing::warn!(error = %e, "Failed to clear persisted credential");
        }
        true
    }

    /// Identity change: clear attempt history and detach any refresh in flight.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        Self::next_epoch(&mut state);
    }

    fn next_epoch(state: &mut RefreshState) {
        state.gate.reset();
        state.invalidated = None;
        state.epoch = state.epoch.wrapping_add(1);
        tracing::debug!(epoch = state.epoch, "Refresh state reset");
    }

    /// Login: reset and install in one step, so no request can observe the new
    /// epoch paired with the previous credential.
    pub fn start_session(&self, credential: Credential) -> Arc<Credential> {
        let credential = self.stamp(credential);
        {
            let mut state = self.lock_state();
            Self::next_epoch(&mut state);
            self.inner.credential.store(Some(credential.clone()));
        }
        if let Err(e) = self.inner.slots.save_credential(&credential) {
            tracing::warn!(error = %e, "Failed to persist credential");
        }
        credential
    }

    /// Logout: reset and forget the credential in one step.
    pub fn end_session(&self) {
        {
            let mut state = self.lock_state();
            Self::next_epoch(&mut state);
            self.inner.credential.store(None);
        }
        if let Err(e) = self.inner.slots.clear_credential() {
            tracing::warn!(error = %e, "Failed to clear persisted credential");
        }
    }

    /// Current login epoch.
    pub fn epoch(&self) -> u64 {
        self.lock_state().epoch
    }

    /// Epoch and credential read together, for stamping an outgoing request.
    pub fn snapshot(&self) -> (u64, Option<Arc<Credential>>) {
        let state = self.lock_state();
        (state.epoch, self.inner.credential.load_full())
    }

    /// Attempts since the last successful refresh.
    pub fn attempts(&self) -> u32 {
        self.lock_state().gate.attempts()
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock_state().in_flight
    }

    /// Return a credential the backend has not rejected, refreshing first if
    /// the current one was invalidated. Safe to call from any number of
    /// concurrent sites; at most one refresh runs.
    pub async fn ensure_valid_credential(&self) -> SessionResult<Arc<Credential>> {
        self.obtain(None).await
    }

    /// Refresh now, even if the current credential has not been rejected.
    pub async fn revalidate(&self) -> SessionResult<Arc<Credential>> {
        let generation = self.current().map(|c| c.generation());
        self.obtain(generation).await
    }

    /// Hook for a request that came back 401: renew the credential once and
    /// replay the request exactly once.
    pub async fn on_unauthorized(&self, request: ApiRequest) -> SessionResult<ApiResponse> {
        if request.replayed {
            tracing::warn!(path = %request.path, "Replayed request rejected again");
            return Err(SessionError::AuthExpired);
        }

        self.ensure_same_session(&request)?;
        let credential = match self.obtain(request.credential_generation()).await {
            Ok(credential) => credential,
            Err(e) => {
                self.ensure_same_session(&request)?;
                return Err(e);
            }
        };
        self.ensure_same_session(&request)?;
        tracing::debug!(
            path = %request.path,
            generation = credential.generation(),
            "Replaying request with renewed credential"
        );

        let response = self
            .inner
            .transport
            .send(request.replay_with(credential))
            .await?;
        if response.is_unauthorized() {
            self.ensure_same_session(&request)?;
            tracing::warn!(path = %request.path, "Backend rejected renewed credential");
            return Err(SessionError::AuthExpired);
        }
        response.into_result()
    }

    fn ensure_same_session(&self, request: &ApiRequest) -> SessionResult<()> {
        match request.epoch {
            Some(issued) if issued != self.epoch() => {
                metrics::record_refresh("session_changed");
                tracing::info!(
                    path = %request.path,
                    issued,
                    "Session changed while request was in flight, not replaying"
                );
                Err(SessionError::SessionChanged)
            }
            _ => Ok(()),
        }
    }

    /// `stale`: generation the caller saw rejected.
    async fn obtain(&self, stale: Option<u64>) -> SessionResult<Arc<Credential>> {
        let receiver = {
            let mut state = self.lock_state();
            let current = self.inner.credential.load_full();

            if let Some(credential) = &current {
                if stale == Some(credential.generation()) {
                    state.invalidated = stale;
                }
                if state.invalidated != Some(credential.generation()) {
                    return Ok(credential.clone());
                }
            }

            let (tx, rx) = oneshot::channel();
            if state.in_flight {
                state.waiters.push_back(tx);
                metrics::record_refresh("joined");
                tracing::debug!(waiters = state.waiters.len(), "Joined in-flight refresh");
                rx
            } else {
                let now = self.inner.clock.now_millis();
                match state.gate.check(now) {
                    GateDecision::Open => {}
                    GateDecision::CoolingDown { retry_after_ms } => {
                        metrics::record_refresh("throttled");
                        return Err(SessionError::RefreshThrottled { retry_after_ms });
                    }
                    GateDecision::Exhausted { attempts, retry_after_ms } => {
                        metrics::record_refresh("rejected_exhausted");
                        tracing::warn!(attempts, retry_after_ms, "Refresh attempts exhausted");
                        return Err(SessionError::RefreshExhausted { attempts });
                    }
                }

                let credential = match current {
                    Some(c) if !c.csrf_token().is_empty() => c,
                    _ => {
                        tracing::warn!("No CSRF token available for refresh");
                        return Err(SessionError::CsrfMissing);
                    }
                };

                state.gate.record_attempt(now);
                state.in_flight = true;
                state.waiters.push_back(tx);
                let epoch = state.epoch;
                tracing::info!(attempt = state.gate.attempts(), "Refreshing credential");

                let this = self.clone();
                let refresh = tokio::spawn(async move { this.perform_refresh(&credential).await });
                let this = self.clone();
                tokio::spawn(async move {
                    let outcome = refresh.await.unwrap_or_else(|e| {
                        tracing::error!(error = %e, "Refresh task panicked");
                        Err(SessionError::Internal(format!("refresh task failed: {}", e)))
                    });
                    this.settle(epoch, outcome);
                });
                rx
            }
        };

        receiver
            .await
            .map_err(|_| SessionError::Internal("refresh task ended without an outcome".into()))?
    }

    async fn perform_refresh(&self, credential: &Arc<Credential>) -> SessionResult<Credential> {
        let request =
            ApiRequest::post(REFRESH_PATH, Some(json!({}))).with_credential(Some(credential.clone()));
        let response = self.inner.transport.send(request).await?;
        if !response.is_success() {
            return Err(SessionError::RefreshRejected {
                status: response.status,
            });
        }
        Ok(credential.rotated(&response.cookies))
    }

    fn settle(&self, epoch: u64, outcome: SessionResult<Credential>) {
        enum Persist {
            Save(Arc<Credential>),
            Clear,
            Nothing,
        }

        let (waiters, result, persist) = {
            let mut state = self.lock_state();
            state.in_flight = false;
            let waiters = std::mem::take(&mut state.waiters);

            if state.epoch != epoch {
                tracing::info!("Identity changed during refresh, discarding its result");
                let current = self.current().ok_or(SessionError::CsrfMissing);
                (waiters, current, Persist::Nothing)
            } else {
                match outcome {
                    Ok(next) => {
                        state.gate.record_success();
                        state.invalidated = None;
                        let credential = self.stamp(next);
                        self.inner.credential.store(Some(credential.clone()));
                        metrics::record_refresh("success");
                        tracing::info!(
                            generation = credential.generation(),
                            waiters = waiters.len(),
                            "Credential refreshed"
                        );
                        (waiters, Ok(credential.clone()), Persist::Save(credential))
                    }
                    Err(e) if state.gate.is_exhausted() => {
                        let attempts = state.gate.attempts();
                        state.invalidated = None;
                        self.inner.credential.store(None);
                        metrics::record_refresh("exhausted");
                        tracing::error!(attempts, error = %e, "Credential refresh exhausted, session dropped");
                        (waiters, Err(SessionError::RefreshExhausted { attempts }), Persist::Clear)
                    }
                    Err(e) => {
                        metrics::record_refresh("failure");
                        tracing::warn!(attempts = state.gate.attempts(), error = %e, "Credential refresh failed");
                        (waiters, Err(e), Persist::Nothing)
                    }
                }
            }
        };

        let persisted = match persist {
            Persist::Save(credential) => self.inner.slots.save_credential(&credential),
            Persist::Clear => self.inner.slots.clear_credential(),
            Persist::Nothing => Ok(()),
        };
        if let Err(e) = persisted {
            tracing::warn!(error = %e, "Failed to update persisted credential");
        }

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::transport::fake::FakeTransport;
    use std::time::Duration;

    fn policy() -> RefreshPolicy {
        RefreshPolicy {
            max_attempts: 5,
            cooldown_ms: 5_000,
            exhausted_lockout_ms: 300_000,
        }
    }

    fn coordinator(transport: Arc<FakeTransport>, clock: Arc<ManualClock>) -> (RefreshCoordinator, MemoryStore) {
        let store = MemoryStore::new();
        let coordinator = RefreshCoordinator::new(
            transport,
            CredentialStore::new(Arc::new(store.clone())),
            clock,
            policy(),
        );
        (coordinator, store)
    }

    fn refresh_ok(transport: &FakeTransport, new_csrf: &'static str) {
        transport.on(REFRESH_PATH, move |_| {
            Ok(ApiResponse::new(200, "{}")
                .with_cookie("access_token", format!("access-{}", new_csrf))
                .with_cookie("csrf_token", new_csrf))
        });
    }

    /// Accept only requests carrying the given CSRF token.
    fn protected(transport: &FakeTransport, path: &str, csrf: &'static str) {
        transport.on(path, move |req| {
            match &req.credential {
                Some(c) if c.csrf_token() == csrf => Ok(ApiResponse::new(200, "\"ok\"")),
                _ => Ok(ApiResponse::new(401, r#"{"error":"Unauthorized"}"#)),
            }
        });
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let transport = FakeTransport::new();
        transport.set_delay(Duration::from_millis(30));
        refresh_ok(&transport, "c2");
        let clock = Arc::new(ManualClock::new(0));
        let (coord, _) = coordinator(transport.clone(), clock);
        let stale = coord.install(Credential::for_tests("c1"));

        let mut handles = Vec::new();
        for i in 0..5 {
            let path = format!("/data/{}", i);
            protected(&transport, &path, "c2");
            let coord = coord.clone();
            let request = ApiRequest::get(path).with_credential(Some(stale.clone()));
            handles.push(tokio::spawn(async move { coord.on_unauthorized(request).await }));
        }

        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.status, 200);
        }
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
        for i in 0..5 {
            let replays = transport.requests_to(&format!("/data/{}", i));
            assert_eq!(replays.len(), 1);
            assert_eq!(replays[0].credential.as_ref().unwrap().csrf_token(), "c2");
        }
        assert_eq!(coord.current().unwrap().csrf_token(), "c2");
        assert_eq!(coord.attempts(), 0);
    }

    #[tokio::test]
    async fn test_waiters_released_in_join_order() {
        let transport = FakeTransport::new();
        refresh_ok(&transport, "c2");
        let release = transport.hold();
        let clock = Arc::new(ManualClock::new(0));
        let (coord, _) = coordinator(transport.clone(), clock);
        coord.install(Credential::for_tests("c1"));

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..4 {
            let coord = coord.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let credential = coord.revalidate().await.unwrap();
                order.lock().unwrap().push(i);
                credential.csrf_token().to_string()
            }));
            tokio::task::yield_now().await;
        }
        assert!(coord.is_refreshing());

        release.send(true).unwrap();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "c2");
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
    }

    #[tokio::test]
    async fn test_already_rotated_generation_skips_refresh() {
        let transport = FakeTransport::new();
        refresh_ok(&transport, "c2");
        protected(&transport, "/data", "c2");
        let clock = Arc::new(ManualClock::new(0));
        let (coord, _) = coordinator(transport.clone(), clock);
        let stale = coord.install(Credential::for_tests("c1"));

        let request = ApiRequest::get("/data").with_credential(Some(stale.clone()));
        coord.on_unauthorized(request.clone()).await.unwrap();
        // A late 401 for the old generation replays with the new credential.
        coord.on_unauthorized(request).await.unwrap();

        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
        assert_eq!(transport.calls_to("/data"), 2);
    }

    #[tokio::test]
    async fn test_second_rejection_is_fatal() {
        let transport = FakeTransport::new();
        refresh_ok(&transport, "c2");
        protected(&transport, "/data", "never");
        let clock = Arc::new(ManualClock::new(0));
        let (coord, _) = coordinator(transport.clone(), clock);
        let stale = coord.install(Credential::for_tests("c1"));

        let err = coord
            .on_unauthorized(ApiRequest::get("/data").with_credential(Some(stale)))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::AuthExpired);
        assert!(err.is_fatal());
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
        assert_eq!(transport.calls_to("/data"), 1);
    }

    #[tokio::test]
    async fn test_attempt_ceiling() {
        let transport = FakeTransport::new();
        transport.on(REFRESH_PATH, |_| Ok(ApiResponse::new(500, "{}")));
        let clock = Arc::new(ManualClock::new(0));
        let (coord, store) = coordinator(transport.clone(), clock.clone());
        coord.install(Credential::for_tests("c1"));

        for attempt in 1..=5 {
            let err = coord.revalidate().await.unwrap_err();
            if attempt < 5 {
                assert_eq!(err, SessionError::RefreshRejected { status: 500 });
            } else {
                assert_eq!(err, SessionError::RefreshExhausted { attempts: 5 });
            }
            clock.advance(Duration::from_millis(5_000));
        }
        assert_eq!(transport.calls_to(REFRESH_PATH), 5);
        assert!(coord.current().is_none());
        assert!(store.get("session:credential").unwrap().is_none());

        // Sixth caller: rejected without network I/O.
        let err = coord.ensure_valid_credential().await.unwrap_err();
        assert_eq!(err, SessionError::RefreshExhausted { attempts: 5 });
        assert_eq!(transport.calls_to(REFRESH_PATH), 5);

        // A fresh login resets the counter.
        coord.reset();
        coord.install(Credential::for_tests("c9"));
        assert_eq!(coord.attempts(), 0);
        let _ = coord.revalidate().await;
        assert_eq!(transport.calls_to(REFRESH_PATH), 6);
    }

    #[tokio::test]
    async fn test_lockout_expiry_reopens_gate() {
        let transport = FakeTransport::new();
        transport.on(REFRESH_PATH, |_| Ok(ApiResponse::new(500, "{}")));
        let clock = Arc::new(ManualClock::new(0));
        let (coord, _) = coordinator(transport.clone(), clock.clone());
        coord.install(Credential::for_tests("c1"));

        for _ in 0..5 {
            let _ = coord.revalidate().await;
            clock.advance(Duration::from_millis(5_000));
        }
        clock.advance(Duration::from_millis(300_000));

        // Window over, but the credential is gone: nothing to refresh with.
        let err = coord.ensure_valid_credential().await.unwrap_err();
        assert_eq!(err, SessionError::CsrfMissing);
        assert_eq!(transport.calls_to(REFRESH_PATH), 5);
    }

    #[tokio::test]
    async fn test_cooldown_after_failure() {
        let transport = FakeTransport::new();
        transport.script(REFRESH_PATH, Err(SessionError::Transport("reset".into())));
        refresh_ok(&transport, "c2");
        let clock = Arc::new(ManualClock::new(0));
        let (coord, _) = coordinator(transport.clone(), clock.clone());
        coord.install(Credential::for_tests("c1"));

        assert_eq!(
            coord.revalidate().await.unwrap_err(),
            SessionError::Transport("reset".into())
        );

        clock.advance(Duration::from_millis(1_000));
        assert_eq!(
            coord.ensure_valid_credential().await.unwrap_err(),
            SessionError::RefreshThrottled { retry_after_ms: 4_000 }
        );
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);

        clock.advance(Duration::from_millis(4_000));
        let credential = coord.ensure_valid_credential().await.unwrap();
        assert_eq!(credential.csrf_token(), "c2");
        assert_eq!(transport.calls_to(REFRESH_PATH), 2);
    }

    #[tokio::test]
    async fn test_missing_credential_is_fatal_without_network() {
        let transport = FakeTransport::new();
        let clock = Arc::new(ManualClock::new(0));
        let (coord, _) = coordinator(transport.clone(), clock);

        let err = coord.ensure_valid_credential().await.unwrap_err();
        assert_eq!(err, SessionError::CsrfMissing);
        assert_eq!(transport.calls_to(REFRESH_PATH), 0);
        assert_eq!(coord.attempts(), 0);
    }

    #[tokio::test]
    async fn test_identity_change_discards_in_flight_result() {
        let transport = FakeTransport::new();
        refresh_ok(&transport, "stale-rotation");
        let release = transport.hold();
        let clock = Arc::new(ManualClock::new(0));
        let (coord, _) = coordinator(transport.clone(), clock);
        coord.install(Credential::for_tests("c1"));

        let pending = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.revalidate().await })
        };
        tokio::task::yield_now().await;
        assert!(coord.is_refreshing());

        coord.reset();
        coord.install(Credential::for_tests("fresh-login"));
        release.send(true).unwrap();

        let credential = pending.await.unwrap().unwrap();
        assert_eq!(credential.csrf_token(), "fresh-login");
        assert_eq!(coord.current().unwrap().csrf_token(), "fresh-login");
    }

    #[tokio::test]
    async fn test_success_is_persisted_and_restorable() {
        let transport = FakeTransport::new();
        refresh_ok(&transport, "c2");
        let clock = Arc::new(ManualClock::new(0));
        let (coord, store) = coordinator(transport.clone(), clock.clone());
        coord.install(Credential::for_tests("c1"));
        coord.revalidate().await.unwrap();

        let restored = RefreshCoordinator::new(
            transport,
            CredentialStore::new(Arc::new(store)),
            clock,
            policy(),
        );
        assert_eq!(restored.restore().unwrap().csrf_token(), "c2");
    }

    #[tokio::test]
    async fn test_back_to_back_refreshes_are_throttled() {
        let transport = FakeTransport::new();
        refresh_ok(&transport, "c2");
        let clock = Arc::new(ManualClock::new(0));
        let (coord, _) = coordinator(transport.clone(), clock.clone());
        coord.install(Credential::for_tests("c1"));

        coord.revalidate().await.unwrap();
        assert_eq!(
            coord.revalidate().await.unwrap_err(),
            SessionError::RefreshThrottled { retry_after_ms: 5_000 }
        );
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
        assert_eq!(coord.attempts(), 0);

        clock.advance(Duration::from_millis(5_000));
        coord.revalidate().await.unwrap();
        assert_eq!(transport.calls_to(REFRESH_PATH), 2);
    }

    #[tokio::test]
    async fn test_request_from_previous_login_is_not_replayed() {
        let transport = FakeTransport::new();
        refresh_ok(&transport, "c2");
        protected(&transport, "/data", "c2");
        let clock = Arc::new(ManualClock::new(0));
        let (coord, _) = coordinator(transport.clone(), clock);
        coord.start_session(Credential::for_tests("first-login"));
        let (epoch, credential) = coord.snapshot();
        let request = ApiRequest::get("/data")
            .with_epoch(epoch)
            .with_credential(credential);

        coord.start_session(Credential::for_tests("second-login"));
        let err = coord.on_unauthorized(request).await.unwrap_err();

        assert_eq!(err, SessionError::SessionChanged);
        assert!(!err.is_fatal());
        assert_eq!(transport.calls_to(REFRESH_PATH), 0);
        assert_eq!(transport.calls_to("/data"), 0);
        assert_eq!(coord.current().unwrap().csrf_token(), "second-login");
    }

    #[tokio::test]
    async fn test_panicking_refresh_settles_waiters() {
        let transport = FakeTransport::new();
        transport.on(REFRESH_PATH, |_| panic!("transport bug"));
        let clock = Arc::new(ManualClock::new(0));
        let (coord, _) = coordinator(transport.clone(), clock.clone());
        coord.install(Credential::for_tests("c1"));

        let err = coord.revalidate().await.unwrap_err();
        assert!(matches!(err, SessionError::Internal(_)));
        assert!(!coord.is_refreshing());
        assert_eq!(coord.attempts(), 1);

        // The gate still works after the failed attempt.
        assert!(matches!(
            coord.revalidate().await.unwrap_err(),
            SessionError::RefreshThrottled { .. }
        ));
    }
}
