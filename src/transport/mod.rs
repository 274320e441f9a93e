//! Outbound HTTP transport.
//!
//! # Data Flow
//! ```text
//! SessionClient / RefreshCoordinator
//!     → ApiRequest (method, path, JSON body, credential snapshot)
//!     → Transport::send (http.rs: reqwest, idempotent retries)
//!     → ApiResponse (status, body text, Set-Cookie pairs)
//! ```
//!
//! # Design Decisions
//! - The transport never interprets status codes; a 401 is a response, not an error
//! - Only connect/timeout/IO failures become `SessionError::Transport`
//! - Credentials travel with the request as an immutable snapshot, so a replay
//!   knows exactly which credential generation was rejected

pub mod http;

pub use http::HttpTransport;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::credential::Credential;
use crate::error::{SessionError, SessionResult};

/// Header carrying the anti-forgery token.
pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// Header carrying a per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// An outbound call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub credential: Option<Arc<Credential>>,
    /// Set on the single replay that follows a refresh.
    pub replayed: bool,
    /// Login epoch the request was issued under.
    pub epoch: Option<u64>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            credential: None,
            replayed: false,
            epoch: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Option<Value>) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_credential(mut self, credential: Option<Arc<Credential>>) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = Some(epoch);
        self
    }

    /// The same request carrying a renewed credential, marked as replayed.
    pub fn replay_with(&self, credential: Arc<Credential>) -> Self {
        Self {
            credential: Some(credential),
            replayed: true,
            ..self.clone()
        }
    }

    /// Generation of the credential this request was sent with.
    pub fn credential_generation(&self) -> Option<u64> {
        self.credential.as_ref().map(|c| c.generation())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// A backend response, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    /// `Set-Cookie` name/value pairs in the order received.
    pub cookies: Vec<(String, String)>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            cookies: Vec::new(),
        }
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Turn a non-success status into `SessionError::Http`.
    pub fn into_result(self) -> SessionResult<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let message = serde_json::from_str::<ErrorBody>(&self.body)
            .map(|b| b.error)
            .unwrap_or_else(|_| self.body.trim().to_string());
        Err(SessionError::Http {
            status: self.status,
            message,
        })
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> SessionResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// True when the body is empty or the JSON literal `null`.
    pub fn is_empty_body(&self) -> bool {
        let body = self.body.trim();
        body.is_empty() || body == "null"
    }
}

/// Performs a single outbound call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> SessionResult<ApiResponse>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result_extracts_error_message() {
        let err = ApiResponse::new(400, r#"{"error":"Invalid email format"}"#)
            .into_result()
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::Http {
                status: 400,
                message: "Invalid email format".into()
            }
        );

        let err = ApiResponse::new(504, "Request timeout\n").into_result().unwrap_err();
        assert_eq!(
            err,
            SessionError::Http {
                status: 504,
                message: "Request timeout".into()
            }
        );
    }

    #[test]
    fn test_empty_body_detection() {
        assert!(ApiResponse::new(200, "null\n").is_empty_body());
        assert!(ApiResponse::new(200, "").is_empty_body());
        assert!(!ApiResponse::new(200, "{}").is_empty_body());
    }

    #[test]
    fn test_replay_marks_request() {
        let first = Arc::new(Credential::for_tests("csrf-1").with_generation(1));
        let second = Arc::new(Credential::for_tests("csrf-2").with_generation(2));

        let request = ApiRequest::get("/user/verify-user").with_credential(Some(first));
        assert_eq!(request.credential_generation(), Some(1));
        assert!(!request.replayed);

        let replay = request.replay_with(second);
        assert!(replay.replayed);
        assert_eq!(replay.credential_generation(), Some(2));
        assert_eq!(replay.path, "/user/verify-user");
    }
}
