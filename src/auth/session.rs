//! Active identity and session status.

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// The logged-in user, as returned by `/auth/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
}

/// Coarse session state published to UI code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session has been established.
    Anonymous,
    Authenticated,
    /// The user logged out.
    LoggedOut,
    /// A fatal auth failure cleared the session; the user must log in again.
    ReauthRequired,
}

/// Process-wide view of who is logged in.
///
/// Reads are lock-free; writes come only from login, logout, restore and
/// fatal-error handling.
pub struct SessionContext {
    identity: ArcSwapOption<Identity>,
    status: watch::Sender<SessionStatus>,
}

impl SessionContext {
    pub fn new() -> Self {
        let (status, _) = watch::channel(SessionStatus::Anonymous);
        Self {
            identity: ArcSwapOption::empty(),
            status,
        }
    }

    pub fn identity(&self) -> Option<Arc<Identity>> {
        self.identity.load_full()
    }

    pub fn identity_id(&self) -> Option<String> {
        self.identity.load_full().map(|i| i.id.clone())
    }

    /// True when `identity_id` is the active session's identity.
    pub fn is_active(&self, identity_id: &str) -> bool {
        self.identity
            .load_full()
            .is_some_and(|i| i.id == identity_id)
    }

    pub(crate) fn begin(&self, identity: Identity) {
        tracing::info!(identity = %identity.id, "Session established");
        self.identity.store(Some(Arc::new(identity)));
        self.status.send_replace(SessionStatus::Authenticated);
    }

    /// Drop the identity and publish why.
    pub(crate) fn end(&self, status: SessionStatus) -> Option<Arc<Identity>> {
        let previous = self.identity.swap(None);
        if let Some(identity) = &previous {
            tracing::info!(identity = %identity.id, ?status, "Session ended");
        }
        self.status.send_replace(status);
        previous
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}
