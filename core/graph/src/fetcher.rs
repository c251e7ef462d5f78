//! Rate-limited fetcher: issues authenticated GETs and classifies the outcome.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use notemirror_common::{AccessToken, Error, Result};

use crate::backoff::BackoffConfig;
use crate::transport::{HttpTransport, RawResponse};

/// HTTP status the remote rate limiter answers with.
const TOO_MANY_REQUESTS: u16 = 429;

/// Successful response body.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    /// URL the body was fetched from.
    pub url: String,
    /// Declared content type, including parameters.
    pub content_type: Option<String>,
    /// Raw body.
    pub body: Bytes,
}

impl FetchedBody {
    /// Media type without parameters, lower-cased (`text/html`).
    pub fn media_type(&self) -> Option<String> {
        self.content_type.as_deref().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::MalformedResponse(format!("{}: invalid JSON body: {}", self.url, e))
        })
    }

    /// Decode the body as UTF-8 text.
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec()).map_err(|e| {
            Error::MalformedResponse(format!("{}: body is not UTF-8: {}", self.url, e))
        })
    }
}

/// Error body returned by the remote API on failures.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Rate-limited fetcher.
///
/// Every attempt holds one permit of a shared semaphore, which bounds the
/// number of requests in flight across all concurrent callers. A 429 answer
/// releases the permit, sleeps on the linear backoff schedule and retries the
/// same URL until the limiter lets it through.
pub struct Fetcher {
    transport: Arc<dyn HttpTransport>,
    token: AccessToken,
    backoff: BackoffConfig,
    permits: Arc<Semaphore>,
}

impl Fetcher {
    /// Create a fetcher allowing at most `max_in_flight` concurrent requests.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        token: AccessToken,
        backoff: BackoffConfig,
        max_in_flight: usize,
    ) -> Self {
        Self {
            transport,
            token,
            backoff,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Backoff schedule in use.
    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Fetch `url`.
    ///
    /// # Errors
    /// - `Error::Unavailable` on 500/504 or a connection failure (no retry)
    /// - `Error::Http` on any other non-2xx status
    /// - `Error::Cancelled` once `cancel` fires, including mid-backoff
    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<FetchedBody> {
        let mut attempt: u32 = 0;

        loop {
            let response = self.attempt(url, cancel).await?;

            match response.status {
                200..=299 => {
                    if attempt > 0 {
                        debug!("{} succeeded after {} rate-limited attempts", url, attempt);
                    }
                    return Ok(FetchedBody {
                        url: url.to_string(),
                        content_type: response.content_type,
                        body: response.body,
                    });
                }
                TOO_MANY_REQUESTS => {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        "Rate limited on {} (attempt {}). Retrying in {:?}...",
                        url, attempt, delay
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = sleep(delay) => {}
                    }
                }
                500 | 504 => {
                    let message = error_message(&response);
                    warn!("{} unavailable: {} {}", url, response.status, message);
                    return Err(Error::Unavailable(format!(
                        "{} answered {}: {}",
                        url, response.status, message
                    )));
                }
                status => {
                    let message = error_message(&response);
                    warn!("{} failed: {} {}", url, status, message);
                    return Err(Error::Http { status, message });
                }
            }
        }
    }

    /// One request, holding an in-flight permit only for its duration.
    async fn attempt(&self, url: &str, cancel: &CancellationToken) -> Result<RawResponse> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| Error::Cancelled)?,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            response = self.transport.get(url, &self.token) => response,
        }
    }
}

/// Human-readable reason for a failed response.
fn error_message(response: &RawResponse) -> String {
    if let Ok(body) = serde_json::from_slice::<ErrorBody>(&response.body) {
        return match (body.error.code, body.error.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (Some(code), None) => code,
            (None, Some(message)) => message,
            (None, None) => format!("status {}", response.status),
        };
    }

    let text = String::from_utf8_lossy(&response.body);
    let text = text.trim();
    if text.is_empty() {
        format!("status {}", response.status)
    } else {
        text.chars().take(200).collect()
    }
}
