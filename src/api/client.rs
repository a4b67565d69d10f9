//! HTTP client for the admin REST API.
//!
//! Requests pass through the installed [`Interceptor`]s on the way out and
//! on the way back, so credentials are attached per request instead of
//! living in shared default headers.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::error::ApiError;

/// Standard `{success, message, data}` wrapper used by the admin API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

/// Hook around every request sent with session hooks enabled.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Runs before the request leaves the process.
    async fn before_request(&self, _request: &mut ApiRequest) {}

    /// Runs once a response (of any status) has been received.
    async fn after_response(&self, _request: &mut ApiRequest, _status: StatusCode) {}
}

/// A request to the admin API.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL.
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub headers: HeaderMap,
    /// Set once a 401 has been handled for this request. Nothing is ever
    /// re-sent; the flag only stops a second interceptor pass from handling
    /// the same 401 again.
    pub retried: bool,
    session_hooks: bool,
    carries_session: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
            retried: false,
            session_hooks: true,
            carries_session: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set an explicit header. Explicit `Authorization` wins over the session token.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Skip every installed interceptor for this request.
    #[must_use]
    pub fn without_session_hooks(mut self) -> Self {
        self.session_hooks = false;
        self
    }

    pub fn session_hooks(&self) -> bool {
        self.session_hooks
    }

    /// Whether an interceptor attached the session credential.
    pub fn carries_session(&self) -> bool {
        self.carries_session
    }

    pub(crate) fn mark_carries_session(&mut self) {
        self.carries_session = true;
    }
}

/// Status and body of a received response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// `message` field of an error envelope, if the body has one.
    pub fn server_message(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.body).ok()?;
        value
            .get("message")
            .and_then(serde_json::Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
    }

    /// Turn non-success statuses into errors.
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.status.is_success() {
            return Ok(self);
        }
        let message = self.server_message().unwrap_or_else(|| {
            self.status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });
        Err(match self.status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized { message },
            StatusCode::FORBIDDEN => ApiError::Forbidden { message },
            status => ApiError::Status { status, message },
        })
    }
}

/// Admin API client.
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    interceptors: RwLock<Vec<Arc<dyn Interceptor>>>,
}

impl ApiClient {
    /// Create a client rooted at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        Url::parse(trimmed).map_err(|e| ApiError::InvalidUrl(format!("{trimmed}: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Transport)?;

        Ok(Self {
            base_url: trimmed.to_string(),
            http,
            interceptors: RwLock::new(Vec::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Register an interceptor; it applies to every later request.
    pub fn install(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.write().push(interceptor);
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        let joined = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&joined).map_err(|e| ApiError::InvalidUrl(format!("{joined}: {e}")))
    }

    /// Absolute URL for an uploaded asset such as an avatar.
    /// Already-absolute URLs are returned unchanged.
    pub fn asset_url(&self, relative: &str) -> Option<String> {
        let relative = relative.trim();
        if relative.is_empty() {
            return None;
        }
        if relative.starts_with("http://") || relative.starts_with("https://") {
            return Some(relative.to_string());
        }
        self.url(relative).ok().map(String::from)
    }

    /// Send a request and return the response whatever its status.
    /// Only a missing response is an error here.
    pub async fn dispatch(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let interceptors = if request.session_hooks {
            self.interceptors.read().clone()
        } else {
            Vec::new()
        };

        for interceptor in &interceptors {
            interceptor.before_request(&mut request).await;
        }

        let url = self.url(&request.path)?;
        tracing::debug!(method = %request.method, path = %request.path, "Sending admin API request");

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(ApiError::Transport)?;
        let status = response.status();
        tracing::debug!(method = %request.method, path = %request.path, %status, "Admin API responded");

        // Hooks see the status even if the body never arrives.
        for interceptor in &interceptors {
            interceptor.after_response(&mut request, status).await;
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Decode(format!("reading body: {e}")))?;
        Ok(ApiResponse { status, body })
    }

    /// Send a request, mapping non-success statuses to errors.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.dispatch(request).await?.error_for_status()
    }

    /// `GET` a JSON document.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(ApiRequest::get(path)).await?.json()
    }

    /// Send a JSON body with `method` and parse the JSON reply.
    pub async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.execute(ApiRequest::new(method, path).json(body))
            .await?
            .json()
    }
}
