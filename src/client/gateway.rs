//! Deduplicated, refresh-aware request path shared by the client and the cache.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::{CredentialStore, RefreshCoordinator, SessionContext, SessionStatus};
use crate::cache::{SubscriptionSource, VerifyUserResponse};
use crate::dedup::{request_key, RequestDeduplicator};
use crate::error::{SessionError, SessionResult};
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Subscription status endpoint.
pub const VERIFY_USER_PATH: &str = "/user/verify-user";

pub(crate) struct Gateway {
    transport: Arc<dyn Transport>,
    dedup: RequestDeduplicator<ApiResponse>,
    coordinator: RefreshCoordinator,
    context: Arc<SessionContext>,
    slots: CredentialStore,
}

impl Gateway {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        dedup: RequestDeduplicator<ApiResponse>,
        coordinator: RefreshCoordinator,
        context: Arc<SessionContext>,
        slots: CredentialStore,
    ) -> Self {
        Self {
            transport,
            dedup,
            coordinator,
            context,
            slots,
        }
    }

    /// Authenticated call. A 401 goes through the refresh coordinator; a fatal
    /// outcome ends the session it was issued under, never a later one.
    pub(crate) async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> SessionResult<ApiResponse> {
        let epoch = self.coordinator.epoch();
        let key = request_key(&method, path, body.as_ref());
        let request = ApiRequest::new(method, path).with_body(body);
        let transport = Arc::clone(&self.transport);
        let coordinator = self.coordinator.clone();

        let result = self
            .dedup
            .execute(key, move || send_authorized(transport, coordinator, request))
            .await;
        if let Err(e) = &result {
            if e.is_fatal() {
                self.end_session_if_current(epoch, e);
            }
        }
        result
    }

    /// Call that carries no credential (login, register, password reset).
    pub(crate) async fn call_public(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> SessionResult<ApiResponse> {
        let key = request_key(&method, path, body.as_ref());
        let request = ApiRequest::new(method, path).with_body(body);
        let transport = Arc::clone(&self.transport);

        self.dedup
            .execute(key, move || async move { transport.send(request).await?.into_result() })
            .await
    }

    /// Responses coalesced so far belong to the previous identity.
    pub(crate) fn forget_pending(&self) {
        self.dedup.forget_all();
    }

    /// Clear credential material and tell subscribers to re-authenticate,
    /// unless a login or logout has happened since `epoch`. Returns whether
    /// the session was ended.
    pub(crate) fn end_session_if_current(&self, epoch: u64, error: &SessionError) -> bool {
        if !self.coordinator.drop_credential(epoch) {
            tracing::info!(error = %error, "Fatal error from a previous session, ignoring");
            return false;
        }
        tracing::warn!(error = %error, "Fatal session error, re-authentication required");
        self.dedup.forget_all();
        if let Err(e) = self.slots.clear() {
            tracing::warn!(error = %e, "Failed to clear session slots");
        }
        self.context.end(SessionStatus::ReauthRequired);
        true
    }
}

async fn send_authorized(
    transport: Arc<dyn Transport>,
    coordinator: RefreshCoordinator,
    request: ApiRequest,
) -> SessionResult<ApiResponse> {
    let (epoch, credential) = coordinator.snapshot();
    let request = request.with_epoch(epoch).with_credential(credential);
    let response = transport.send(request.clone()).await?;
    if response.is_unauthorized() {
        tracing::debug!(path = %request.path, "Unauthorized, handing to refresh coordinator");
        return coordinator.on_unauthorized(request).await;
    }
    response.into_result()
}

#[async_trait]
impl SubscriptionSource for Gateway {
    async fn fetch_subscription(&self) -> SessionResult<Option<VerifyUserResponse>> {
        let response = self.call(Method::GET, VERIFY_USER_PATH, None).await?;
        if response.is_empty_body() {
            return Ok(None);
        }
        response.json().map(Some)
    }
}
