//! Shared HTTP plumbing for the store API.
//!
//! `send` makes one attempt; `send_with_retry` repeats unavailable failures
//! up to `max_retries` times. Mapping failures into domain errors belongs to
//! the callers.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::{RETRY_BACKOFF, StorefrontConfig};
use crate::gateway::OperationToken;

/// Error body returned with 4xx responses.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, alias = "detail")]
    pub message: Option<String>,
    #[serde(default)]
    pub product_id: Option<marketstall_core::ProductId>,
    #[serde(default)]
    pub available: Option<u32>,
}

/// A failed request before any domain interpretation.
#[derive(Debug, Error)]
pub enum ApiFailure {
    /// Connection, timeout or body read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}")]
    Status { status: StatusCode, body: ErrorBody },

    /// The response body did not match the expected shape.
    #[error("undecodable response: {0}")]
    Decode(String),

    /// The request URL could not be built.
    #[error("invalid request path: {0}")]
    InvalidPath(String),
}

impl ApiFailure {
    /// Rate limiting, server outages and transport failures.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::Decode(_) | Self::InvalidPath(_) => false,
        }
    }

    /// The server's message, or the status line when it sent none.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Status { status, body } => body
                .message
                .clone()
                .unwrap_or_else(|| format!("HTTP {status}")),
            other => other.to_string(),
        }
    }
}

/// Thin `reqwest` wrapper bound to the store API base URL.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    base: Url,
    bearer: Option<String>,
    max_retries: u32,
}

impl ApiClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(config: &StorefrontConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(ApiClientInner {
                client,
                base: config.api_url.clone(),
                bearer: config.bearer_token().map(str::to_string),
                max_retries: config.max_retries,
            }),
        })
    }

    /// Resolve a path relative to the base URL.
    ///
    /// # Errors
    ///
    /// Returns `ApiFailure::InvalidPath` if the URL cannot be joined.
    pub fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, ApiFailure> {
        let mut url = self
            .inner
            .base
            .join(path)
            .map_err(|e| ApiFailure::InvalidPath(format!("{path}: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Send a request, retrying rate limits, outages and transport failures.
    ///
    /// Every attempt carries the same `idempotency_key`, so a retried
    /// mutation is applied at most once.
    ///
    /// # Errors
    ///
    /// Returns the last `ApiFailure` once retries are exhausted, or the first
    /// failure that is not worth retrying.
    pub async fn send_with_retry<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
        idempotency_key: Option<OperationToken>,
    ) -> Result<T, ApiFailure> {
        let max_retries = self.inner.max_retries;
        let mut attempt = 0;
        loop {
            match self
                .send(method.clone(), url.clone(), body, idempotency_key)
                .await
            {
                Err(failure) if failure.is_unavailable() && attempt < max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries,
                        %method,
                        url = %url,
                        error = %failure,
                        "Retrying store API request"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                result => return result,
            }
        }
    }

    /// Send one request and decode a JSON response.
    ///
    /// # Errors
    ///
    /// Returns an `ApiFailure` describing what went wrong.
    pub async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
        idempotency_key: Option<OperationToken>,
    ) -> Result<T, ApiFailure> {
        let mut request = self
            .inner
            .client
            .request(method.clone(), url.clone())
            .header("Accept", "application/json");

        if let Some(token) = &self.inner.bearer {
            request = request.bearer_auth(token);
        }
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key.as_header_value());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiFailure::Transport(e.to_string()))?;
        let status = response.status();

        // Read as text first for better diagnostics
        let text = response
            .text()
            .await
            .map_err(|e| ApiFailure::Transport(e.to_string()))?;

        if !status.is_success() {
            debug!(
                %method,
                url = %url,
                status = %status,
                body = %text.chars().take(500).collect::<String>(),
                "Store API returned non-success status"
            );
            let body = serde_json::from_str(&text).unwrap_or_default();
            return Err(ApiFailure::Status { status, body });
        }

        serde_json::from_str(&text).map_err(|e| {
            tracing::error!(
                error = %e,
                url = %url,
                body = %text.chars().take(500).collect::<String>(),
                "Failed to parse store API response"
            );
            ApiFailure::Decode(e.to_string())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn client() -> ApiClient {
        ApiClient::new(&StorefrontConfig::for_api_url("http://127.0.0.1:8000/store").unwrap())
            .unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let url = client().endpoint("carts/abc/items/", &[]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/store/carts/abc/items/");
    }

    #[test]
    fn test_endpoint_encodes_query() {
        let url = client()
            .endpoint("orders/guest/7/", &[("email", "a+b@example.com")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8000/store/orders/guest/7/?email=a%2Bb%40example.com"
        );
    }

    #[test]
    fn test_unavailable_classification() {
        let status = |code: u16| ApiFailure::Status {
            status: StatusCode::from_u16(code).unwrap(),
            body: ErrorBody::default(),
        };
        assert!(status(503).is_unavailable());
        assert!(status(429).is_unavailable());
        assert!(!status(400).is_unavailable());
        assert!(ApiFailure::Transport("reset".into()).is_unavailable());
        assert!(!ApiFailure::Decode("eof".into()).is_unavailable());
    }

    #[test]
    fn test_error_body_accepts_detail_alias() {
        let body: ErrorBody = serde_json::from_value(json!({"detail": "bad quantity"})).unwrap();
        let failure = ApiFailure::Status {
            status: StatusCode::BAD_REQUEST,
            body,
        };
        assert_eq!(failure.message(), "bad quantity");
    }
}
