//! reqwest-backed transport.
//!
//! # Responsibilities
//! - Resolve request paths against the configured base URL
//! - Attach session cookies, the CSRF header and a request id
//! - Capture `Set-Cookie` pairs from responses
//! - Retry idempotent requests on transport failures

use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::Client;
use url::Url;
use uuid::Uuid;

use crate::config::{BackendConfig, RetryConfig};
use crate::error::{SessionError, SessionResult};
use crate::resilience::retries::with_retries;
use crate::transport::{ApiRequest, ApiResponse, Transport, CSRF_HEADER, REQUEST_ID_HEADER};

/// HTTP transport over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    retries: RetryConfig,
}

impl HttpTransport {
    /// Create a transport for the configured backend.
    pub fn new(backend: &BackendConfig, retries: &RetryConfig) -> SessionResult<Self> {
        let mut base_url: Url = backend.base_url.parse().map_err(|e| {
            SessionError::Config(format!("Invalid base URL '{}': {}", backend.base_url, e))
        })?;
        // Keep any path prefix when joining relative endpoint paths.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = Client::builder()
            .timeout(backend.request_timeout())
            .default_headers(default_headers());
        if !backend.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| SessionError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        tracing::info!(
            base_url = %base_url,
            timeout_secs = backend.request_timeout_secs,
            "HTTP transport initialized"
        );

        Ok(Self {
            client,
            base_url,
            retries: retries.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn resolve(&self, path: &str) -> SessionResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| SessionError::Internal(format!("Invalid path '{}': {}", path, e)))
    }

    async fn send_once(&self, request: &ApiRequest) -> SessionResult<ApiResponse> {
        let url = self.resolve(&request.path)?;
        let request_id = Uuid::new_v4();

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .header(REQUEST_ID_HEADER, request_id.to_string());
        if let Some(credential) = &request.credential {
            builder = builder
                .header(COOKIE, credential.cookie_header())
                .header(CSRF_HEADER, credential.csrf_token());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let cookies = response
            .cookies()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect();
        let body = response.text().await?;

        tracing::debug!(
            %request_id,
            method = %request.method,
            path = %request.path,
            status,
            replayed = request.replayed,
            "Backend responded"
        );

        Ok(ApiResponse {
            status,
            body,
            cookies,
        })
    }
}

fn default_headers() -> reqwest::header::HeaderMap {
    use reqwest::header::{HeaderValue, ACCEPT};

    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> SessionResult<ApiResponse> {
        with_retries(&self.retries, &request.method, || self.send_once(&request)).await
    }
}
