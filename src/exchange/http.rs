//! Shared REST dispatch for all venue adapters.
//!
//! Centralizes the concerns every adapter would otherwise duplicate:
//! - a single fixed per-call timeout (30s), so a stalled venue cannot block
//!   the engine indefinitely,
//! - a minimum inter-request interval derived from the venue's published
//!   requests-per-second limit, enforced independently of the engine's own
//!   pacing,
//! - a uniform retry policy with linear backoff for transport errors and
//!   retryable status codes (429/5xx).
//!
//! Order placement must go through [`RestDispatcher::send_once`]: retrying a
//! POST that may already have executed risks a double fill.

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Uniform retry policy applied by the dispatcher.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// One dispatcher per venue; the underlying client/session is shared across
/// all calls to that venue.
pub struct RestDispatcher {
    http: Client,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
    retry: RetryPolicy,
}

impl RestDispatcher {
    /// Create a dispatcher pacing at `requests_per_second`.
    pub fn new(requests_per_second: u32) -> Result<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let rps = requests_per_second.max(1);
        Ok(Self {
            http,
            min_interval: Duration::from_millis(1000 / rps as u64),
            last_request: Mutex::new(None),
            retry: RetryPolicy::default(),
        })
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The shared client, for adapters to build requests against.
    pub fn client(&self) -> &Client {
        &self.http
    }

    /// Wait out the venue's minimum inter-request interval.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Send a request with the uniform retry policy.
    ///
    /// `make` builds a fresh request per attempt so signed requests carry a
    /// current timestamp on retry.
    pub async fn send<T, F>(&self, make: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry.max_attempts {
            match self.dispatch(make()).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry.max_attempts && is_retryable(&e) => {
                    warn!(attempt, max = self.retry.max_attempts, error = %e, "Request failed, retrying");
                    last_error = Some(e);
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("request failed")))
    }

    /// Send a request exactly once (order placement path).
    pub async fn send_once<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.dispatch(request).await
    }

    async fn dispatch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.pace().await;

        let response = request.send().await.context("Transport error")?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, body = %body, "Non-success response");
            return Err(HttpStatusError { status }.into());
        }

        response.json::<T>().await.context("Malformed response body")
    }
}

/// Status-coded failure, kept as a typed error so the retry filter can see
/// the code.
#[derive(Debug)]
struct HttpStatusError {
    status: StatusCode,
}

impl std::fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP status {}", self.status)
    }
}

impl std::error::Error for HttpStatusError {}

fn is_retryable(error: &anyhow::Error) -> bool {
    if let Some(status_err) = error.downcast_ref::<HttpStatusError>() {
        return status_err.status == StatusCode::TOO_MANY_REQUESTS
            || status_err.status.is_server_error();
    }
    // Transport-level failures (timeout, connection reset) are retryable.
    error.downcast_ref::<reqwest::Error>().is_some()
        || error
            .chain()
            .any(|cause| cause.downcast_ref::<reqwest::Error>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Pong {
        ok: bool,
    }

    #[tokio::test]
    async fn test_send_parses_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let dispatcher = RestDispatcher::new(100).unwrap();
        let url = format!("{}/ping", server.uri());
        let pong: Pong = dispatcher.send(|| dispatcher.client().get(&url)).await.unwrap();
        assert!(pong.ok);
    }

    #[tokio::test]
    async fn test_send_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let dispatcher = RestDispatcher::new(100).unwrap().with_retry(RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        });
        let url = format!("{}/flaky", server.uri());
        let pong: Pong = dispatcher.send(|| dispatcher.client().get(&url)).await.unwrap();
        assert!(pong.ok);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nope"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = RestDispatcher::new(100).unwrap().with_retry(RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        });
        let url = format!("{}/nope", server.uri());
        let result: Result<Pong> = dispatcher.send(|| dispatcher.client().get(&url)).await;
        assert!(result.is_err());
    }
}
