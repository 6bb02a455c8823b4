//! HTTP transport abstraction.
//!
//! The dispatcher talks to external services through the `Transport` trait
//! so that call handling, rate limiting, and event logging can be exercised
//! without a network. `MockTransport` is the scriptable implementation used
//! in tests and demos; the production implementation lives in
//! [`crate::reqwest`].

use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// HTTP method for an outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Returns the method as its wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Request headers, matched by exact name; a later insert overwrites.
    pub headers: HashMap<String, String>,
    /// JSON body, if any.
    pub body: Option<JsonValue>,
    /// Per-call deadline; falls back to the transport's default when unset.
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    /// Creates a request with no headers, body, or deadline.
    #[must_use]
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Sets a header, overwriting any previous value for the name.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a per-call deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The response to an outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON body, when the response carried one.
    pub body: Option<JsonValue>,
}

impl TransportResponse {
    /// Creates a response with no body.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self { status, body: None }
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends resolved requests to external services.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request and returns the response.
    ///
    /// # Errors
    ///
    /// Returns an error only for network-level failures; an HTTP error
    /// status is a successful send.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// A scriptable transport for tests and demos.
///
/// Responses are served from a queue first, then from the fallback the
/// constructor fixed. Every request is recorded for inspection.
#[derive(Debug)]
pub struct MockTransport {
    queued: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    fallback: Result<TransportResponse, TransportError>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    /// A transport that answers every request with 200 and no body.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::with_fallback(Ok(TransportResponse::new(200)))
    }

    /// A transport that answers every request with the given status.
    #[must_use]
    pub fn with_status(status: u16) -> Self {
        Self::with_fallback(Ok(TransportResponse::new(status)))
    }

    /// A transport that fails every request with the given error.
    #[must_use]
    pub fn failing(error: TransportError) -> Self {
        Self::with_fallback(Err(error))
    }

    fn with_fallback(fallback: Result<TransportResponse, TransportError>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a one-shot outcome served before the fallback.
    pub fn queue(&self, result: Result<TransportResponse, TransportError>) {
        self.queued.lock().unwrap().push_back(result);
    }

    /// Returns copies of every request seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Returns the number of requests seen so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        if let Some(result) = self.queued.lock().unwrap().pop_front() {
            return result;
        }
        self.fallback.clone()
    }
}
