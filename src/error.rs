//! Error taxonomy for the session layer.
//!
//! Errors are `Clone` because a single failure is handed verbatim to every
//! caller that coalesced onto the same in-flight operation.

use thiserror::Error;

/// Errors surfaced by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Network, timeout or IO failure talking to the backend.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend still rejected the request after one refresh-and-replay.
    #[error("session expired and could not be renewed")]
    AuthExpired,

    /// No anti-forgery token is available, so no refresh is possible.
    #[error("CSRF token missing; re-authentication required")]
    CsrfMissing,

    /// The refresh attempt cap was reached.
    #[error("session could not be restored after {attempts} refresh attempts")]
    RefreshExhausted { attempts: u32 },

    /// A refresh was requested inside the cooldown between refresh attempts.
    #[error("credential refresh cooling down, retry in {retry_after_ms} ms")]
    RefreshThrottled { retry_after_ms: u64 },

    /// `/auth/refresh` answered with a non-success status.
    #[error("refresh rejected with status {status}")]
    RefreshRejected { status: u16 },

    /// A persisted value could not be decoded.
    #[error("cached value corrupt: {0}")]
    CacheCorrupt(String),

    /// A cache operation named an identity that is not the active session's.
    #[error("identity {requested} is not the active session identity")]
    IdentityMismatch { requested: String },

    /// A login or logout happened while the request was in flight; it is
    /// neither replayed nor allowed to end the newer session.
    #[error("session changed while the request was in flight")]
    SessionChanged,

    /// An operation needs a logged-in identity and there is none.
    #[error("no active session")]
    NotAuthenticated,

    /// The client configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Any other non-success HTTP response.
    #[error("backend returned status {status}: {message}")]
    Http { status: u16, message: String },

    /// A response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// The durable store failed.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Errors after which the session must be cleared and the user sent back
    /// to login.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::AuthExpired
                | SessionError::CsrfMissing
                | SessionError::RefreshExhausted { .. }
        )
    }

    /// Errors worth retrying for idempotent requests.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Transport(_))
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SessionError::Transport(format!("request timed out: {}", err))
        } else if err.is_decode() {
            SessionError::Decode(err.to_string())
        } else {
            SessionError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Decode(err.to_string())
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
