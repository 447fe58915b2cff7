//! # HTTP Request
//!
//! Request descriptor handed to middleware and the dispatcher.
//!
//! The body is collected once up front; [`ApiRequest::payload`] classifies it
//! so an empty body, a malformed document and a wrong media type each map to
//! their own 400 message.

use crate::error::{Error, Result};
use crate::router::Method;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::Request;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Outcome of reading a request body as JSON
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A parsed JSON document
    Json(Value),
    /// No body, or a body of only whitespace
    Empty,
    /// The body claimed JSON but failed to parse
    Malformed(String),
    /// A body was sent without an `application/json` content type
    UnsupportedMediaType,
}

impl Payload {
    /// Message sent with the 400 response when no JSON document is available
    #[must_use]
    pub fn rejection(&self) -> Option<&'static str> {
        match self {
            Self::Json(_) => None,
            Self::Empty => Some("Request body is missing"),
            Self::Malformed(_) => Some("Request body is not valid JSON"),
            Self::UnsupportedMediaType => Some("Request body must be application/json"),
        }
    }
}

/// HTTP request descriptor
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Request path (without query string)
    pub path: String,
    /// Request headers
    headers: HeaderMap,
    /// Request body (collected)
    body: Option<Bytes>,
}

impl ApiRequest {
    /// Create a request manually (for testing/internal use)
    pub fn new(
        method: Method,
        path: impl Into<String>,
        headers_map: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Self {
        let mut path = path.into();
        if let Some(query) = path.find('?') {
            path.truncate(query);
        }

        let mut request = Self {
            method,
            path,
            headers: HeaderMap::new(),
            body,
        };
        for (k, v) in headers_map {
            request.set_header(&k, &v);
        }
        request
    }

    /// Create a JSON request (sets `Content-Type: application/json`)
    pub fn json(method: Method, path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let mut request = Self::new(method, path, HashMap::new(), Some(body.into()));
        request.set_header(CONTENT_TYPE.as_str(), "application/json");
        request
    }

    /// Create from hyper request with body size limit
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLarge` as soon as the declared or received
    /// body exceeds `max_body_size`, and `Error::Http` if the body stream
    /// fails. At most `max_body_size` bytes are buffered.
    pub async fn from_hyper_with_limit(
        req: Request<hyper::body::Incoming>,
        max_body_size: usize,
    ) -> Result<Self> {
        let method = Method::from(req.method());
        let path = req.uri().path().to_string();
        let headers = req.headers().clone();

        if let Some(declared) = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if declared > max_body_size {
                return Err(Error::PayloadTooLarge {
                    limit: max_body_size,
                });
            }
        }

        let bytes = Limited::new(req.into_body(), max_body_size)
            .collect()
            .await
            .map_err(|e| body_error(e, max_body_size))?
            .to_bytes();

        Ok(Self {
            method,
            path,
            headers,
            body: Some(bytes),
        })
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// Get the request body as bytes
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Whether the content type is `application/json`, parameters ignored
    fn is_json(&self) -> bool {
        self.header(CONTENT_TYPE.as_str())
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|media| media.trim().eq_ignore_ascii_case("application/json"))
    }

    /// Read the body as a JSON payload
    ///
    /// Parse failures are logged and reported as [`Payload::Malformed`];
    /// they never abort the request.
    #[must_use]
    pub fn payload(&self) -> Payload {
        let body = match self.body_bytes() {
            Some(b) if !b.iter().all(u8::is_ascii_whitespace) => b,
            _ => return Payload::Empty,
        };
        if !self.is_json() {
            return Payload::UnsupportedMediaType;
        }

        match crate::json::parse_json::<Value>(body) {
            Ok(value) => Payload::Json(value),
            Err(e) => {
                warn!(method = %self.method, path = %self.path, error = %e, "Malformed JSON payload");
                Payload::Malformed(e.to_string())
            }
        }
    }
}

fn body_error(err: Box<dyn std::error::Error + Send + Sync>, limit: usize) -> Error {
    if err.is::<LengthLimitError>() {
        return Error::PayloadTooLarge { limit };
    }
    match err.downcast::<hyper::Error>() {
        Ok(http) => Error::Http(*http),
        Err(other) => Error::Io(std::io::Error::other(other)),
    }
}
