//! Session client facade.
//!
//! # Data Flow
//! ```text
//! UI code
//!     → SessionClient (login/logout/restore, get/post, subscription)
//!     → Gateway (RequestDeduplicator → Transport, 401 → RefreshCoordinator)
//!     → SessionDataCache (subscription reads, background heal)
//! ```
//!
//! # Design Decisions
//! - One client per process; clones of its parts share state
//! - Fatal auth errors end the session and publish `ReauthRequired`
//! - Login resets refresh history; a different identity also resets cache heal
//!   history

mod account;
mod gateway;

pub use gateway::VERIFY_USER_PATH;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::auth::{
    Credential, CredentialStore, Identity, RefreshCoordinator, SessionContext, SessionStatus,
};
use crate::cache::{SessionDataCache, Subscription};
use crate::clock::{Clock, SystemClock};
use crate::config::validation::validate_config;
use crate::config::SessionConfig;
use crate::dedup::RequestDeduplicator;
use crate::error::{SessionError, SessionResult};
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::transport::{ApiResponse, HttpTransport, Transport};

use gateway::Gateway;

pub const LOGIN_PATH: &str = "/auth/login";
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Builder for [`SessionClient`]. Anything not supplied is derived from config.
pub struct SessionClientBuilder {
    config: SessionConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    transport: Option<Arc<dyn Transport>>,
}

impl SessionClientBuilder {
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> SessionResult<SessionClient> {
        let config = self.config;
        validate_config(&config).map_err(|errors| {
            SessionError::Config(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config.backend, &config.retries)?),
        };
        let store: Arc<dyn KeyValueStore> = match (self.store, &config.storage.path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileStore::open(path)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let slots = CredentialStore::new(Arc::clone(&store));
        let context = Arc::new(SessionContext::new());
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&transport),
            slots.clone(),
            Arc::clone(&clock),
            config.refresh.clone(),
        );
        let gateway = Arc::new(Gateway::new(
            transport,
            RequestDeduplicator::new(Duration::from_millis(config.dedup.grace_ms)),
            coordinator.clone(),
            Arc::clone(&context),
            slots.clone(),
        ));
        let cache = SessionDataCache::new(
            store,
            gateway.clone(),
            Arc::clone(&context),
            clock,
            config.cache.clone(),
        );

        tracing::info!(
            max_refresh_attempts = config.refresh.max_attempts,
            cache_ttl_secs = config.cache.ttl_secs,
            persistent = config.storage.path.is_some(),
            "Session client ready"
        );

        Ok(SessionClient {
            gateway,
            coordinator,
            context,
            cache,
            slots,
        })
    }
}

/// Entry point for UI code.
pub struct SessionClient {
    gateway: Arc<Gateway>,
    coordinator: RefreshCoordinator,
    context: Arc<SessionContext>,
    cache: SessionDataCache,
    slots: CredentialStore,
}

impl SessionClient {
    pub fn builder(config: SessionConfig) -> SessionClientBuilder {
        SessionClientBuilder {
            config,
            store: None,
            clock: None,
            transport: None,
        }
    }

    /// Client over HTTP with the configured store.
    pub fn new(config: SessionConfig) -> SessionResult<Self> {
        Self::builder(config).build()
    }

    pub async fn login(&self, email: &str, password: &str) -> SessionResult<Arc<Identity>> {
        let body = json!({ "email": email, "password": password });
        let response = self.gateway.call_public(Method::POST, LOGIN_PATH, Some(body)).await?;
        let identity: Identity = response.json()?;
        let credential = Credential::from_cookies(&response.cookies)?;
        Ok(self.establish(identity, credential))
    }

    /// Install a fresh session. Attempt history from any previous session is
    /// discarded.
    fn establish(&self, identity: Identity, credential: Credential) -> Arc<Identity> {
        if !self.context.is_active(&identity.id) {
            self.cache.reset_heal();
        }
        self.gateway.forget_pending();
        self.coordinator.start_session(credential);
        if let Err(e) = self.slots.save_identity(&identity) {
            tracing::warn!(error = %e, "Failed to persist identity");
        }
        self.context.begin(identity.clone());
        Arc::new(identity)
    }

    /// End the session. Local state is always cleared; a failing server call
    /// is only logged.
    pub async fn logout(&self) -> SessionResult<()> {
        // A fatal failure of the server call already ends the context.
        let identity_id = self.context.identity_id();
        if self.coordinator.current().is_some() {
            if let Err(e) = self.gateway.call(Method::POST, LOGOUT_PATH, None).await {
                tracing::warn!(error = %e, "Server logout failed, clearing local session anyway");
            }
        }

        self.context.end(SessionStatus::LoggedOut);
        if let Some(identity_id) = identity_id {
            self.cache.clear(&identity_id);
        }
        self.cache.reset_heal();
        self.gateway.forget_pending();
        self.coordinator.end_session();
        self.clear_slots();
        Ok(())
    }

    /// Resume a session persisted by a previous run.
    pub fn restore(&self) -> Option<Arc<Identity>> {
        let Some(identity) = self.slots.load_identity() else {
            self.clear_slots();
            return None;
        };
        if self.coordinator.restore().is_none() {
            tracing::info!(identity = %identity.id, "Persisted identity has no credential");
            self.clear_slots();
            return None;
        }
        self.context.begin(identity);
        self.context.identity()
    }

    /// Force one refresh through the coordinator.
    pub async fn revalidate(&self) -> SessionResult<()> {
        let epoch = self.coordinator.epoch();
        match self.coordinator.revalidate().await {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.is_fatal() {
                    self.end_session(epoch, &e);
                }
                Err(e)
            }
        }
    }

    /// The active user's subscription: the cached value while fresh, a fetch
    /// otherwise.
    pub async fn subscription(&self) -> SessionResult<Subscription> {
        let identity = self.require_identity()?;
        if let Some(entry) = self.cache.get(&identity.id) {
            return Ok(entry.value);
        }
        Ok(self.cache.refresh(&identity.id).await?.value)
    }

    /// Fetch the subscription regardless of cache state. A failure keeps the
    /// cached entry.
    pub async fn force_refresh_subscription(&self) -> SessionResult<Subscription> {
        let identity = self.require_identity()?;
        Ok(self.cache.refresh(&identity.id).await?.value)
    }

    pub async fn get(&self, path: &str) -> SessionResult<ApiResponse> {
        self.authorized(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> SessionResult<ApiResponse> {
        self.authorized(Method::POST, path, body).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SessionResult<T> {
        self.get(path).await?.json()
    }

    pub(crate) async fn authorized(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> SessionResult<ApiResponse> {
        let identity_id = self.context.identity_id();
        let result = self.gateway.call(method, path, body).await;
        if let (Err(e), Some(identity_id)) = (&result, identity_id) {
            if e.is_fatal() {
                self.cache.clear(&identity_id);
            }
        }
        result
    }

    fn end_session(&self, epoch: u64, error: &SessionError) {
        let identity_id = self.context.identity_id();
        if !self.gateway.end_session_if_current(epoch, error) {
            return;
        }
        if let Some(identity_id) = identity_id {
            self.cache.clear(&identity_id);
        }
    }

    fn clear_slots(&self) {
        if let Err(e) = self.slots.clear() {
            tracing::warn!(error = %e, "Failed to clear session slots");
        }
    }

    fn require_identity(&self) -> SessionResult<Arc<Identity>> {
        self.context.identity().ok_or(SessionError::NotAuthenticated)
    }

    pub fn identity(&self) -> Option<Arc<Identity>> {
        self.context.identity()
    }

    pub fn status(&self) -> SessionStatus {
        self.context.status()
    }

    /// Session status changes, for UI redirects.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.context.subscribe()
    }

    pub fn cache(&self) -> &SessionDataCache {
        &self.cache
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }
}
