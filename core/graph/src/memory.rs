//! In-memory transport for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use notemirror_common::{AccessToken, Result};

use crate::transport::{HttpTransport, RawResponse};

/// Scripted responses for one URL.
///
/// Responses are served in order; the last one keeps being served once the
/// queue is down to a single entry.
#[derive(Debug, Default)]
struct Route {
    responses: VecDeque<RawResponse>,
}

/// In-memory HTTP transport.
///
/// Useful for testing. Every URL answers with scripted responses and every
/// request is logged. Unknown URLs answer 404.
#[derive(Default)]
pub struct MemoryTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryTransport {
    /// Create a transport with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `url` with `response`, replacing any previous script.
    pub fn respond(&self, url: impl Into<String>, response: RawResponse) {
        self.respond_sequence(url, vec![response]);
    }

    /// Answer `url` with `responses` in order, repeating the last one.
    pub fn respond_sequence(&self, url: impl Into<String>, responses: Vec<RawResponse>) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.insert(
            url.into(),
            Route {
                responses: responses.into(),
            },
        );
    }

    /// Every URL requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of requests issued for `url`.
    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    /// Total number of requests issued.
    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Forget the request log, keeping the routes.
    pub fn clear_requests(&self) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl HttpTransport for MemoryTransport {
    async fn get(&self, url: &str, _token: &AccessToken) -> Result<RawResponse> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());

        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let response = match routes.get_mut(url) {
            Some(route) if route.responses.len() > 1 => route.responses.pop_front(),
            Some(route) => route.responses.front().cloned(),
            None => None,
        };

        Ok(response.unwrap_or_else(|| RawResponse::status(404)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> AccessToken {
        AccessToken::new("test-token").unwrap()
    }

    #[tokio::test]
    async fn test_unknown_url_is_not_found() {
        let transport = MemoryTransport::new();
        let response = transport.get("https://example.test/x", &token()).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(transport.request_count("https://example.test/x"), 1);
    }

    #[tokio::test]
    async fn test_sequence_repeats_last() {
        let transport = MemoryTransport::new();
        transport.respond_sequence(
            "https://example.test/a",
            vec![RawResponse::status(429), RawResponse::html("ok")],
        );

        let t = token();
        assert_eq!(transport.get("https://example.test/a", &t).await.unwrap().status, 429);
        assert_eq!(transport.get("https://example.test/a", &t).await.unwrap().status, 200);
        assert_eq!(transport.get("https://example.test/a", &t).await.unwrap().status, 200);
        assert_eq!(transport.total_requests(), 3);
    }
}
