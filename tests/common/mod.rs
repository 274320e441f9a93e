//! Shared utilities for integration tests: an in-process mock of the auth
//! backend served over real HTTP.

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use session_core::config::SessionConfig;

pub const PASSWORD: &str = "correct horse";

struct Tokens {
    generation: u32,
    access: String,
    csrf: String,
    access_valid: bool,
}

/// Counters and knobs of the mock backend.
pub struct BackendState {
    pub login_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    pub verify_calls: AtomicU32,
    pub logout_calls: AtomicU32,
    /// Non-zero forces `/auth/refresh` to answer with this status.
    pub refresh_status: AtomicU16,
    /// Non-zero forces `/user/verify-user` to answer with this status.
    pub verify_status: AtomicU16,
    pub verify_delay_ms: AtomicU64,
    /// Body of `/user/verify-user`; `None` answers `null`.
    subscription: Mutex<Option<Value>>,
    tokens: Mutex<Tokens>,
}

impl BackendState {
    fn new() -> Self {
        Self {
            login_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            verify_calls: AtomicU32::new(0),
            logout_calls: AtomicU32::new(0),
            refresh_status: AtomicU16::new(0),
            verify_status: AtomicU16::new(0),
            verify_delay_ms: AtomicU64::new(0),
            subscription: Mutex::new(Some(json!({
                "status": "active",
                "product_id": 11,
                "variant_id": 22
            }))),
            tokens: Mutex::new(Tokens {
                generation: 0,
                access: String::new(),
                csrf: String::new(),
                access_valid: false,
            }),
        }
    }

    /// Invalidate the access token server-side, as if it expired.
    pub fn expire_access(&self) {
        self.tokens.lock().unwrap().access_valid = false;
    }

    pub fn set_subscription(&self, body: Option<Value>) {
        *self.subscription.lock().unwrap() = body;
    }

    pub fn current_csrf(&self) -> String {
        self.tokens.lock().unwrap().csrf.clone()
    }

    pub fn refreshes(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn verifies(&self) -> u32 {
        self.verify_calls.load(Ordering::SeqCst)
    }

    fn issue(&self) -> Vec<(header::HeaderName, String)> {
        let mut tokens = self.tokens.lock().unwrap();
        tokens.generation += 1;
        tokens.access = format!("access-{}", tokens.generation);
        tokens.csrf = format!("csrf-{}", tokens.generation);
        tokens.access_valid = true;
        vec![
            cookie("access_token", &tokens.access),
            cookie("refresh_token", &format!("refresh-{}", tokens.generation)),
            cookie("csrf_token", &tokens.csrf),
        ]
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let tokens = self.tokens.lock().unwrap();
        tokens.access_valid
            && cookie_value(headers, "access_token").as_deref() == Some(tokens.access.as_str())
    }
}

fn cookie(name: &str, value: &str) -> (header::HeaderName, String) {
    (
        header::SET_COOKIE,
        format!("{}={}; Path=/; HttpOnly", name, value),
    )
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(header::COOKIE)?
        .to_str()
        .ok()?
        .split("; ")
        .find_map(|pair| pair.strip_prefix(&format!("{}=", name)).map(str::to_string))
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response()
}

fn identity_for(email: &str) -> Value {
    json!({
        "id": format!("user-{}", email),
        "name": email.split('@').next().unwrap_or(email),
        "email": email,
        "email_verified": true
    })
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(State(state): State<Arc<BackendState>>, Json(body): Json<LoginBody>) -> Response {
    state.login_calls.fetch_add(1, Ordering::SeqCst);
    if body.password != PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid credentials" })),
        )
            .into_response();
    }
    let cookies = state.issue();
    (AppendHeaders(cookies), Json(identity_for(&body.email))).into_response()
}

async fn refresh(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);

    let forced = state.refresh_status.load(Ordering::SeqCst);
    if forced != 0 {
        let status = StatusCode::from_u16(forced).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, Json(json!({ "error": "refresh failed" }))).into_response();
    }

    let sent = headers
        .get("X-CSRF-Token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if sent.is_none() || sent != Some(state.current_csrf()) {
        return (StatusCode::FORBIDDEN, Json(json!({ "error": "CSRF token mismatch" }))).into_response();
    }

    let cookies = state.issue();
    (AppendHeaders(cookies), Json(json!({ "message": "refreshed" }))).into_response()
}

async fn verify_user(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.verify_calls.fetch_add(1, Ordering::SeqCst);

    let delay = state.verify_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if !state.authorized(&headers) {
        return unauthorized();
    }
    let forced = state.verify_status.load(Ordering::SeqCst);
    if forced != 0 {
        let status = StatusCode::from_u16(forced).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, Json(json!({ "error": "verification unavailable" }))).into_response();
    }

    let body = state.subscription.lock().unwrap().clone();
    Json(body.unwrap_or(Value::Null)).into_response()
}

async fn data(
    State(state): State<Arc<BackendState>>,
    Path(n): Path<u32>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "n": n })).into_response()
}

async fn logout(State(state): State<Arc<BackendState>>) -> Response {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, Json(json!({ "message": "logged out" }))).into_response()
}

/// A running mock backend.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub state: Arc<BackendState>,
}

/// Start the mock backend on an ephemeral port.
pub async fn start_mock_backend() -> MockBackend {
    let state = Arc::new(BackendState::new());
    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/user/verify-user", get(verify_user))
        .route("/data/{n}", get(data))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockBackend { addr, state }
}

/// Client config pointed at `addr`.
pub fn config_for(addr: SocketAddr) -> SessionConfig {
    let mut config = SessionConfig::default();
    config.backend.base_url = format!("http://{}", addr);
    config.backend.use_system_proxy = false;
    config.backend.request_timeout_secs = 5;
    config.dedup.grace_ms = 20;
    config
}

/// A unique path under the system temp directory.
pub fn temp_store_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("session-core-{}.json", uuid::Uuid::new_v4()))
}
