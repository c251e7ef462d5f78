//! HTTP transport seam.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use std::time::Duration;
use tracing::debug;

use notemirror_common::{AccessToken, Error, Result};

/// A raw HTTP answer, before any classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Value of the `Content-Type` header, if present.
    pub content_type: Option<String>,
    /// Response body.
    pub body: Bytes,
}

impl RawResponse {
    /// Build a response from its parts.
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    /// A 200 response carrying a JSON document.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(
            200,
            Some("application/json; odata.metadata=minimal"),
            value.to_string(),
        )
    }

    /// A 200 response carrying an HTML document.
    pub fn html(body: impl Into<String>) -> Self {
        Self::new(200, Some("text/html"), body.into())
    }

    /// A 200 response carrying binary content.
    pub fn bytes(body: impl Into<Bytes>) -> Self {
        Self::new(200, Some("application/octet-stream"), body)
    }

    /// An empty response with the given status.
    pub fn status(status: u16) -> Self {
        Self::new(status, None, Bytes::new())
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Capability to issue an authenticated GET request.
///
/// Implementations only carry the request; status interpretation, rate
/// limiting and retries belong to the [`Fetcher`](crate::Fetcher).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue `GET url` with a bearer `Authorization` header.
    ///
    /// # Errors
    /// - `Error::Unavailable` when the connection failed or timed out
    /// - `Error::Network` for any other transport failure
    async fn get(&self, url: &str, token: &AccessToken) -> Result<RawResponse>;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    /// Create a transport whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("notemirror/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, token: &AccessToken) -> Result<RawResponse> {
        debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, token.bearer_header())
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(url, e))?;

        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

fn classify_reqwest_error(url: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::Unavailable(format!("{}: {}", url, err))
    } else {
        Error::Network(format!("{}: {}", url, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_response_constructors() {
        let ok = RawResponse::html("<p>hi</p>");
        assert!(ok.is_success());
        assert_eq!(ok.content_type.as_deref(), Some("text/html"));

        let limited = RawResponse::status(429);
        assert!(!limited.is_success());
        assert!(limited.body.is_empty());
    }

    #[test]
    fn test_reqwest_transport_builds() {
        assert!(ReqwestTransport::new(Duration::from_secs(5)).is_ok());
    }
}
