use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::session::SessionManager;

const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure classes every caller above the gateway reasons about.
///
/// Raw status codes never leave this module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// 401/403: the token is missing, expired or rejected.
    ///
    /// `generation` is the [`SessionManager::generation`] the request was
    /// sent under.
    #[error("Not signed in or session expired")]
    Unauthorized {
        detail: Option<String>,
        generation: u64,
    },
    /// 4xx carrying a human-readable `detail`, shown to the user verbatim.
    #[error("{detail}")]
    Validation { status: u16, detail: String },
    /// Network failure, timeout or 5xx. Worth one retry.
    #[error("Service unavailable, please try again ({0})")]
    Unavailable(String),
    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl GatewayError {
    /// Returns true if this error is transient and the request may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

/// Errors raised while building a gateway.
#[derive(Debug, Error)]
pub enum GatewaySetupError {
    #[error("Invalid API base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Insecure API base URL: HTTPS required (except localhost)")]
    InsecureBaseUrl,
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, GatewayError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| GatewayError::Unknown(format!("malformed response body: {e}")))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

// ============================================================================
// RequestGateway
// ============================================================================

/// HTTP client for the analysis API.
///
/// Attaches the current bearer token to every call and turns every failure
/// into a [`GatewayError`]. It never touches the session itself; acting on
/// `Unauthorized` is the caller's job.
#[derive(Clone)]
pub struct RequestGateway {
    client: reqwest::Client,
    base_url: String,
    session: SessionManager,
    timeout: Duration,
    retry_delay: Duration,
}

impl RequestGateway {
    pub fn new(
        base_url: &str,
        session: SessionManager,
        timeout: Duration,
    ) -> Result<Self, GatewaySetupError> {
        let parsed = Url::parse(base_url)?;
        if parsed.scheme() != "https" {
            let is_localhost = matches!(parsed.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
            if parsed.scheme() != "http" || !is_localhost {
                tracing::error!(base_url = %base_url, "Rejecting non-HTTPS API base URL");
                return Err(GatewaySetupError::InsecureBaseUrl);
            }
            tracing::debug!(base_url = %base_url, "Using plain HTTP API base URL (localhost only)");
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            timeout,
            retry_delay: Duration::ZERO,
        })
    }

    /// Pause before the single retry of an `Unavailable` request.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<ApiResponse, GatewayError> {
        self.send(Method::GET, path, query, None).await
    }

    pub async fn post_json<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse, GatewayError> {
        let body = serde_json::to_value(body)
            .map_err(|e| GatewayError::Unknown(format!("failed to encode request: {e}")))?;
        self.send(Method::POST, path, &[], Some(body)).await
    }

    /// Send a request, retrying once on `Unavailable` for idempotent methods.
    ///
    /// Mutations are never replayed: a 5xx on `POST /analyses` may still have
    /// created the record.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse, GatewayError> {
        let idempotent = method == Method::GET || method == Method::HEAD;
        let mut retried = false;

        loop {
            match self.send_once(method.clone(), path, query, body.as_ref()).await {
                Err(e) if e.is_retryable() && idempotent && !retried => {
                    tracing::debug!(
                        error = %e,
                        method = %method,
                        path = path,
                        "Retrying request after transient error"
                    );
                    retried = true;
                    if !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, method = %method, path = path, "Request failed");
                    return Err(e);
                }
                Ok(response) => return Ok(response),
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse, GatewayError> {
        let url = self.url_for(path, query)?;
        let mut request = self
            .client
            .request(method, url)
            .header(ACCEPT, "application/json");

        let generation = self.session.generation();
        if let Some(token) = self.session.token() {
            request = request.bearer_auth(token.expose());
        }

        if let Some(body) = body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| GatewayError::Unknown(format!("failed to encode request: {e}")))?;
            request = request.header(CONTENT_TYPE, "application/json").body(bytes);
        }

        // The deadline covers the body too, not just the headers.
        let exchange = async {
            let response = request.send().await.map_err(classify_transport)?;
            let status = response.status();
            let body = read_limited(response, MAX_RESPONSE_SIZE).await?;
            Ok::<_, GatewayError>((status, body))
        };
        let (status, body) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                GatewayError::Unavailable(format!("request timed out after {:?}", self.timeout))
            })??;

        match classify_status(status, &body, generation) {
            Some(err) => Err(err),
            None => Ok(ApiResponse { status, body }),
        }
    }

    fn url_for(&self, path: &str, query: &[(&str, String)]) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| GatewayError::Unknown(format!("invalid request URL: {e}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

// ============================================================================
// Classification
// ============================================================================

fn classify_transport(err: reqwest::Error) -> GatewayError {
    if err.is_builder() {
        GatewayError::Unknown(err.to_string())
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

/// Map a status and body to a failure class. `None` means success.
pub(crate) fn classify_status(
    status: StatusCode,
    body: &[u8],
    generation: u64,
) -> Option<GatewayError> {
    if status.is_success() {
        return None;
    }

    let detail = extract_detail(body);
    let code = status.as_u16();

    let err = match code {
        401 | 403 => GatewayError::Unauthorized { detail, generation },
        408 | 429 => GatewayError::Unavailable(format!("HTTP {code}")),
        500..=599 => GatewayError::Unavailable(match detail {
            Some(detail) => format!("HTTP {code}: {detail}"),
            None => format!("HTTP {code}"),
        }),
        400..=499 => match detail {
            Some(detail) => GatewayError::Validation {
                status: code,
                detail,
            },
            None => GatewayError::Unknown(format!("HTTP {code} without detail")),
        },
        _ => GatewayError::Unknown(format!("unexpected HTTP status {code}")),
    };
    Some(err)
}

/// Pull a readable message out of `{"detail": ...}`.
///
/// Accepts a plain string or a list of `{ "msg": ... }` objects (request
/// validation errors); anything else yields `None`.
fn extract_detail(body: &[u8]) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_slice(body).ok()?;
    match parsed.detail? {
        serde_json::Value::String(detail) if !detail.trim().is_empty() => Some(detail),
        serde_json::Value::Array(items) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        _ => None,
    }
}

async fn read_limited(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, GatewayError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(GatewayError::Unknown(format!(
                "response too large (exceeds {limit} bytes)"
            )));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify_transport)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(GatewayError::Unknown(format!(
                "response too large (exceeds {limit} bytes)"
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
