use dashmap::DashMap;
use http::Method;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use flagsync_core::{Result, SyncError, Validators};

use crate::{
    BreakerState, CircuitBreaker, HttpConfig, HttpRequest, HttpResponse, ReqwestTransport,
    Transport,
};

/// Result of a request that reached the server
#[derive(Debug, Clone, PartialEq)]
pub enum HttpOutcome {
    /// 2xx response
    Ok(HttpResponse),
    /// 304, the cached representation is still valid
    NotModified(HttpResponse),
}

impl HttpOutcome {
    pub fn response(&self) -> &HttpResponse {
        match self {
            HttpOutcome::Ok(response) | HttpOutcome::NotModified(response) => response,
        }
    }

    pub fn into_response(self) -> HttpResponse {
        match self {
            HttpOutcome::Ok(response) | HttpOutcome::NotModified(response) => response,
        }
    }

    pub fn is_not_modified(&self) -> bool {
        matches!(self, HttpOutcome::NotModified(_))
    }

    fn from_response(response: HttpResponse) -> Result<Self> {
        if response.is_not_modified() {
            Ok(HttpOutcome::NotModified(response))
        } else if response.is_success() {
            Ok(HttpOutcome::Ok(response))
        } else {
            Err(SyncError::HttpStatus(response.status))
        }
    }
}

/// HTTP client with retry, per-host circuit breaking and conditional requests.
///
/// Cloning is cheap and shares breakers and the transport.
pub struct HttpClient<T: Transport = ReqwestTransport> {
    transport: Arc<T>,
    config: HttpConfig,
    breakers: Arc<DashMap<String, CircuitBreaker>>,
}

impl<T: Transport> Clone for HttpClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            breakers: Arc::clone(&self.breakers),
        }
    }
}

impl HttpClient<ReqwestTransport> {
    /// Client over a reqwest transport built from `config`
    pub fn from_config(config: HttpConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport> HttpClient<T> {
    pub fn new(transport: T, config: HttpConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            config,
            breakers: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Conditional GET
    pub async fn get(&self, url: &str, validators: &Validators) -> Result<HttpOutcome> {
        self.execute(HttpRequest::get(url).with_validators(validators))
            .await
    }

    /// Conditional HEAD, retried once as GET if it fails
    pub async fn head(&self, url: &str, validators: &Validators) -> Result<HttpOutcome> {
        let request = HttpRequest::head(url).with_validators(validators);
        match self.execute(request.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(SyncError::Cancelled) => Err(SyncError::Cancelled),
            Err(err) => {
                debug!(target: "flagsync", url, error = %err, "HEAD failed, falling back to GET");
                self.execute(request.with_method(Method::GET)).await
            }
        }
    }

    /// Conditional POST with a JSON body
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        validators: &Validators,
    ) -> Result<HttpOutcome> {
        let body =
            serde_json::to_vec(body).map_err(|e| SyncError::SerializationError(e.to_string()))?;
        self.execute(
            HttpRequest::post(url)
                .json_body(body)
                .with_validators(validators),
        )
        .await
    }

    /// Send `request`, retrying transient failures while the host's breaker allows it
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpOutcome> {
        let host = request.host()?;
        let breaker = self.breaker(&host);
        let policy = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            if !breaker.allow_request() {
                debug!(target: "flagsync", host = %host, "circuit open, request short-circuited");
                return Err(SyncError::CircuitOpen(host));
            }

            let mut pending = PendingReport::new(&breaker);
            let result = self
                .transport
                .send(request.clone())
                .await
                .and_then(HttpOutcome::from_response);
            pending.disarm();

            let err = match result {
                Ok(outcome) => {
                    breaker.report_success();
                    return Ok(outcome);
                }
                Err(err) => err,
            };

            if err.trips_breaker() {
                breaker.report_failure();
            } else if matches!(err, SyncError::Cancelled) {
                breaker.release();
            } else {
                // The host answered, even if with something we dislike.
                breaker.report_success();
            }

            if err.is_retryable() && policy.should_retry(attempt) {
                let delay = policy.backoff(attempt);
                debug!(
                    target: "flagsync",
                    method = %request.method,
                    url = %request.url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying request"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if err.is_retryable() {
                warn!(
                    target: "flagsync",
                    method = %request.method,
                    url = %request.url,
                    attempt,
                    error = %err,
                    "request failed after retries"
                );
            }
            return Err(err);
        }
    }

    /// Number of hosts whose breaker is not closed
    pub fn open_circuits(&self) -> usize {
        self.breakers
            .iter()
            .filter(|entry| entry.value().state() != BreakerState::Closed)
            .count()
    }

    /// Breaker state for `host`, if it has been contacted
    pub fn breaker_state(&self, host: &str) -> Option<BreakerState> {
        self.breakers.get(host).map(|b| b.state())
    }

    fn breaker(&self, host: &str) -> CircuitBreaker {
        if let Some(breaker) = self.breakers.get(host) {
            return breaker.clone();
        }
        self.breakers
            .entry(host.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.breaker.clone()))
            .clone()
    }
}

/// Gives the breaker's probe slot back if an attempt is dropped before it reports
struct PendingReport<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl<'a> PendingReport<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingReport<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use crate::{BreakerConfig, RetryPolicy};
    use std::time::Duration;

    const URL: &str = "https://flags.example.com/v1/config";

    fn client(mock: &MockTransport) -> HttpClient<MockTransport> {
        let config = HttpConfig::default()
            .retry(
                RetryPolicy::new()
                    .max_attempts(3)
                    .base_delay(Duration::from_millis(10))
                    .jitter(false),
            )
            .breaker(
                BreakerConfig::default()
                    .failure_threshold(3)
                    .cooldown(Duration::from_secs(60)),
            );
        HttpClient::new(mock.clone(), config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success() {
        let mock = MockTransport::new();
        mock.push_response(HttpResponse::ok(r#"{"flags":{}}"#).with_header("ETag", "\"v1\""));

        let outcome = client(&mock).get(URL, &Validators::default()).await.unwrap();
        assert!(!outcome.is_not_modified());
        assert_eq!(outcome.response().header("etag"), Some("\"v1\""));
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_modified_is_distinct() {
        let mock = MockTransport::new();
        mock.push_response(HttpResponse::with_status(304));

        let validators = Validators::new(None, Some("\"v1\"".into()));
        let outcome = client(&mock).post_json(URL, &serde_json::json!({}), &validators).await.unwrap();
        assert!(outcome.is_not_modified());

        let sent = &mock.requests()[0];
        assert_eq!(sent.method, Method::POST);
        assert_eq!(sent.headers[http::header::IF_NONE_MATCH], "\"v1\"");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let mock = MockTransport::new();
        mock.push_error(SyncError::Timeout);
        mock.push_response(HttpResponse::with_status(503));
        mock.push_response(HttpResponse::ok("{}"));

        let outcome = client(&mock).get(URL, &Validators::default()).await.unwrap();
        assert!(matches!(outcome, HttpOutcome::Ok(_)));
        assert_eq!(mock.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust() {
        let mock = MockTransport::new();
        mock.set_default(Err(SyncError::ConnectionLost("reset".into())));

        let err = client(&mock).get(URL, &Validators::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::ConnectionLost(_)));
        assert_eq!(mock.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_retries_client_errors() {
        for err in [
            SyncError::TlsError("bad cert".into()),
            SyncError::SerializationError("garbage".into()),
            SyncError::DnsFailure("nx".into()),
        ] {
            let mock = MockTransport::new();
            mock.set_default(Err(err.clone()));
            assert_eq!(client(&mock).get(URL, &Validators::default()).await.unwrap_err(), err);
            assert_eq!(mock.request_count(), 1);
        }

        let mock = MockTransport::new();
        mock.set_default(Ok(HttpResponse::with_status(404)));
        let err = client(&mock).get(URL, &Validators::default()).await.unwrap_err();
        assert_eq!(err, SyncError::HttpStatus(404));
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_head_falls_back_to_get_once() {
        let mock = MockTransport::new();
        mock.push_response(HttpResponse::with_status(405));
        mock.push_response(HttpResponse::ok("").with_header("Last-Modified", "yesterday"));

        let outcome = client(&mock).head(URL, &Validators::default()).await.unwrap();
        assert_eq!(outcome.response().validators().last_modified.as_deref(), Some("yesterday"));

        let methods: Vec<_> = mock.requests().into_iter().map(|r| r.method).collect();
        assert_eq!(methods, vec![Method::HEAD, Method::GET]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_head_fallback_failure_surfaces() {
        let mock = MockTransport::new();
        mock.set_default(Ok(HttpResponse::with_status(403)));

        let err = client(&mock).head(URL, &Validators::default()).await.unwrap_err();
        assert_eq!(err, SyncError::HttpStatus(403));
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_short_circuits() {
        let mock = MockTransport::new();
        mock.set_default(Err(SyncError::ConnectionRefused("refused".into())));
        let client = client(&mock);

        for _ in 0..3 {
            let _ = client.get(URL, &Validators::default()).await;
        }
        assert_eq!(mock.request_count(), 3);
        assert_eq!(client.open_circuits(), 1);
        assert_eq!(client.breaker_state("flags.example.com"), Some(BreakerState::Open));

        let err = client.get(URL, &Validators::default()).await.unwrap_err();
        assert_eq!(err, SyncError::CircuitOpen("flags.example.com".into()));
        assert_eq!(mock.request_count(), 3);

        // Other hosts are unaffected
        mock.set_default(Ok(HttpResponse::ok("{}")));
        assert!(client.get("https://other.example.com/", &Validators::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_probe_releases_half_open_slot() {
        let mock = MockTransport::new();
        let client = HttpClient::new(
            mock.clone(),
            HttpConfig::default().retry(RetryPolicy::none()).breaker(
                BreakerConfig::default()
                    .failure_threshold(1)
                    .cooldown(Duration::from_millis(20)),
            ),
        );
        let host = "flags.example.com";

        mock.push_error(SyncError::Timeout);
        assert!(client.get(URL, &Validators::default()).await.is_err());
        assert_eq!(client.breaker_state(host), Some(BreakerState::Open));
        tokio::time::sleep(Duration::from_millis(30)).await;

        mock.set_latency(Duration::from_millis(200));
        mock.set_default(Ok(HttpResponse::ok("{}")));
        let in_flight = {
            let client = client.clone();
            tokio::spawn(async move { client.get(URL, &Validators::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.breaker_state(host), Some(BreakerState::HalfOpen));

        in_flight.abort();
        assert!(in_flight.await.unwrap_err().is_cancelled());

        mock.set_latency(Duration::ZERO);
        assert!(client.get(URL, &Validators::default()).await.is_ok());
        assert_eq!(client.breaker_state(host), Some(BreakerState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_url() {
        let mock = MockTransport::new();
        let err = client(&mock).get("not a url", &Validators::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidUrl(_)));
        assert_eq!(mock.request_count(), 0);
    }
}
