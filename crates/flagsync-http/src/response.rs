use serde::de::DeserializeOwned;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::collections::HashMap;

use flagsync_core::{Result, SyncError, Validators};

use crate::CacheControl;

/// An HTTP request the client wants to make
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Add a header; names or values that are not valid HTTP are ignored
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Attach a JSON body
    pub fn json_body(mut self, body: Vec<u8>) -> Self {
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = Some(body);
        self
    }

    /// Add `If-None-Match` / `If-Modified-Since` from cached validators
    pub fn with_validators(mut self, validators: &Validators) -> Self {
        if let Some(etag) = validators.etag.as_deref() {
            if let Ok(value) = HeaderValue::from_str(etag) {
                self.headers.insert(header::IF_NONE_MATCH, value);
            }
        }
        if let Some(last_modified) = validators.last_modified.as_deref() {
            if let Ok(value) = HeaderValue::from_str(last_modified) {
                self.headers.insert(header::IF_MODIFIED_SINCE, value);
            }
        }
        self
    }

    /// Same request with a different method and no body
    pub fn with_method(&self, method: Method) -> Self {
        Self {
            method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: None,
        }
    }

    /// Host part of the URL, used to key circuit breakers
    pub fn host(&self) -> Result<String> {
        let uri: http::Uri = self
            .url
            .parse()
            .map_err(|e: http::uri::InvalidUri| SyncError::InvalidUrl(e.to_string()))?;
        uri.host()
            .map(str::to_string)
            .ok_or_else(|| SyncError::InvalidUrl(format!("missing host in {}", self.url)))
    }
}

/// A buffered HTTP response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create new response
    pub fn new(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            status,
            headers,
            body,
        }
    }

    /// Create from http::Response parts
    pub fn from_parts(status: StatusCode, headers: &HeaderMap, body: Vec<u8>) -> Self {
        let mut headers_map = HashMap::new();
        for (k, v) in headers.iter() {
            if let Ok(s) = v.to_str() {
                headers_map.insert(k.to_string(), s.to_string());
            }
        }

        Self {
            status: status.as_u16(),
            headers: headers_map,
            body,
        }
    }

    /// Empty response with the given status
    pub fn with_status(status: u16) -> Self {
        Self::new(status, HashMap::new(), Vec::new())
    }

    /// `200 OK` with a body
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, HashMap::new(), body.into())
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED.as_u16()
    }

    /// `ETag` / `Last-Modified` carried by this response
    pub fn validators(&self) -> Validators {
        Validators {
            etag: self.header("etag").map(str::to_string),
            last_modified: self.header("last-modified").map(str::to_string),
        }
    }

    /// Parsed `Cache-Control` header
    pub fn cache_control(&self) -> Option<CacheControl> {
        self.header("cache-control").map(CacheControl::parse)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| SyncError::SerializationError(e.to_string()))
    }
}
