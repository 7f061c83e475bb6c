//! Wire transport and failure classification

use async_trait::async_trait;
use std::error::Error;
use std::io;

use flagsync_core::{Result, SyncError};

use crate::{HttpConfig, HttpRequest, HttpResponse};

/// Sends one HTTP request and buffers the response.
///
/// Implementations return `Ok` for every response the server produced,
/// whatever its status; `Err` is reserved for transport failures.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Transport backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| SyncError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client, e.g. one with custom TLS roots
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| classify(&e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| classify(&e))?;

        Ok(HttpResponse::from_parts(status, &headers, body.to_vec()))
    }
}

/// Map a `reqwest::Error` onto the stable error taxonomy.
///
/// Walks the `source()` chain looking for io errors and well-known
/// resolver/TLS messages before falling back to reqwest's own flags.
pub fn classify(error: &reqwest::Error) -> SyncError {
    if error.is_timeout() {
        return SyncError::Timeout;
    }

    let mut current: Option<&(dyn Error + 'static)> = Some(error);
    let mut innermost: &(dyn Error + 'static) = error;
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if let Some(classified) = classify_io(io_err) {
                return classified;
            }
        }
        if let Some(classified) = classify_message(&err.to_string()) {
            return classified;
        }
        innermost = err;
        current = err.source();
    }

    let message = innermost.to_string();
    if error.is_builder() {
        SyncError::InvalidUrl(message)
    } else if error.is_decode() {
        SyncError::SerializationError(message)
    } else if error.is_connect() {
        SyncError::NetworkUnavailable(message)
    } else if error.is_body() || error.is_request() {
        SyncError::ConnectionLost(message)
    } else {
        SyncError::Internal(message)
    }
}

fn classify_io(error: &io::Error) -> Option<SyncError> {
    let message = error.to_string();
    match error.kind() {
        io::ErrorKind::TimedOut => Some(SyncError::Timeout),
        io::ErrorKind::ConnectionRefused => Some(SyncError::ConnectionRefused(message)),
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => Some(SyncError::ConnectionLost(message)),
        io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkDown
        | io::ErrorKind::AddrNotAvailable => Some(SyncError::NetworkUnavailable(message)),
        _ => None,
    }
}

/// Classify by the text of an error somewhere in the chain
pub fn classify_message(message: &str) -> Option<SyncError> {
    let lower = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["timed out", "deadline has elapsed"]) {
        Some(SyncError::Timeout)
    } else if has(&[
        "dns error",
        "failed to lookup address",
        "name or service not known",
        "nodename nor servname",
        "no such host",
    ]) {
        Some(SyncError::DnsFailure(message.to_string()))
    } else if has(&["certificate", "tls handshake", "ssl routines", "invalid peer", "unknownissuer"]) {
        Some(SyncError::TlsError(message.to_string()))
    } else if has(&["connection refused"]) {
        Some(SyncError::ConnectionRefused(message.to_string()))
    } else if has(&["connection reset", "connection closed", "broken pipe", "connection aborted"]) {
        Some(SyncError::ConnectionLost(message.to_string()))
    } else if has(&["network is unreachable", "no route to host", "host is down", "network is down"]) {
        Some(SyncError::NetworkUnavailable(message.to_string()))
    } else {
        None
    }
}
