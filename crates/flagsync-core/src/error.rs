//! Error taxonomy for configuration sync
//!
//! Every failure the transport, the store or the fetcher can produce maps to one
//! [`SyncError`] variant. The fetcher branches on these variants, so their meaning
//! is a stable contract.

use thiserror::Error;

/// Main error type for all sync operations
///
/// `Clone` so that one single-flight or coalesced result can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Client is in offline mode, the network was not touched
    #[error("client is offline")]
    Offline,

    /// Connect, read or send timeout
    #[error("request timed out")]
    Timeout,

    /// Host name could not be resolved
    #[error("dns resolution failed: {0}")]
    DnsFailure(String),

    /// Connection dropped mid-request (reset, aborted, closed early)
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Remote actively refused the connection
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// No route to the host
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Certificate, handshake or pinning failure
    #[error("tls error: {0}")]
    TlsError(String),

    /// Non-success HTTP status (4xx/5xx)
    #[error("http status {0}")]
    HttpStatus(u16),

    /// Response body is not parseable as the expected type
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Nothing has ever been cached for the requested key
    #[error("no configuration has been cached yet")]
    CacheNotInitialized,

    /// Request was cancelled before it settled
    #[error("request cancelled")]
    Cancelled,

    /// Circuit breaker for the host is open
    #[error("circuit open for host: {0}")]
    CircuitOpen(String),

    /// Endpoint URL could not be built
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Persistence backend failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether the transport may retry the request that produced this error.
    ///
    /// Only timeouts, lost connections, unreachable networks and 5xx responses qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Timeout | SyncError::ConnectionLost(_) | SyncError::NetworkUnavailable(_) => {
                true
            }
            SyncError::HttpStatus(code) => (500..=599).contains(code),
            _ => false,
        }
    }

    /// Whether this error counts as a host failure for the circuit breaker.
    ///
    /// 4xx responses prove the host is up and never trip the breaker.
    pub fn trips_breaker(&self) -> bool {
        match self {
            SyncError::Timeout
            | SyncError::DnsFailure(_)
            | SyncError::ConnectionLost(_)
            | SyncError::ConnectionRefused(_)
            | SyncError::NetworkUnavailable(_) => true,
            SyncError::HttpStatus(code) => (500..=599).contains(code),
            _ => false,
        }
    }

    /// Sub-kind of an HTTP status error
    pub fn status_kind(&self) -> Option<StatusKind> {
        match self {
            SyncError::HttpStatus(code) => Some(StatusKind::from_code(*code)),
            _ => None,
        }
    }
}

/// Named sub-kinds of [`SyncError::HttpStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    TooManyRequests,
    InternalServerError,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    /// Any other 4xx
    OtherClient(u16),
    /// Any other 5xx
    OtherServer(u16),
    /// Outside the 4xx/5xx ranges
    Other(u16),
}

impl StatusKind {
    /// Map a raw status code to its sub-kind
    pub fn from_code(code: u16) -> Self {
        match code {
            400 => StatusKind::BadRequest,
            401 => StatusKind::Unauthorized,
            403 => StatusKind::Forbidden,
            404 => StatusKind::NotFound,
            409 => StatusKind::Conflict,
            429 => StatusKind::TooManyRequests,
            500 => StatusKind::InternalServerError,
            502 => StatusKind::BadGateway,
            503 => StatusKind::ServiceUnavailable,
            504 => StatusKind::GatewayTimeout,
            400..=499 => StatusKind::OtherClient(code),
            500..=599 => StatusKind::OtherServer(code),
            _ => StatusKind::Other(code),
        }
    }

    /// Get kind as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::BadRequest => "bad_request",
            StatusKind::Unauthorized => "unauthorized",
            StatusKind::Forbidden => "forbidden",
            StatusKind::NotFound => "not_found",
            StatusKind::Conflict => "conflict",
            StatusKind::TooManyRequests => "too_many_requests",
            StatusKind::InternalServerError => "internal_server_error",
            StatusKind::BadGateway => "bad_gateway",
            StatusKind::ServiceUnavailable => "service_unavailable",
            StatusKind::GatewayTimeout => "gateway_timeout",
            StatusKind::OtherClient(_) => "client_error",
            StatusKind::OtherServer(_) => "server_error",
            StatusKind::Other(_) => "other",
        }
    }
}

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
