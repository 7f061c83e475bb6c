//! Scripted transport for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use flagsync_core::{Result, SyncError};

use crate::{HttpRequest, HttpResponse, Transport};

#[derive(Default)]
struct Script {
    queued: VecDeque<Result<HttpResponse>>,
    fallback: Option<Result<HttpResponse>>,
    requests: Vec<HttpRequest>,
    latency: Option<Duration>,
}

/// Transport that records every request and replays queued results.
///
/// Queued results are consumed in order; once empty the default result is
/// returned for every further request. Clones share the same script.
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response
    pub fn push_response(&self, response: HttpResponse) -> &Self {
        self.script.lock().queued.push_back(Ok(response));
        self
    }

    /// Queue one transport failure
    pub fn push_error(&self, error: SyncError) -> &Self {
        self.script.lock().queued.push_back(Err(error));
        self
    }

    /// Result used once the queue is drained
    pub fn set_default(&self, result: Result<HttpResponse>) {
        self.script.lock().fallback = Some(result);
    }

    /// Delay every response by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.script.lock().latency = Some(latency);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.script.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.script.lock().requests.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let (result, latency) = {
            let mut script = self.script.lock();
            script.requests.push(request);
            let result = script
                .queued
                .pop_front()
                .or_else(|| script.fallback.clone())
                .unwrap_or_else(|| {
                    Err(SyncError::Internal("no scripted response".to_string()))
                });
            (result, script.latency)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        result
    }
}
