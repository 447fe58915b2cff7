//! # HTTP Response
//!
//! Response descriptor produced by the dispatcher and middleware, and its
//! conversion into a hyper response.
//!
//! `Content-Type: application/json` is set only when a body is present and
//! the body is JSON. Plain-text messages go out with no content type so
//! clients do not try to parse them as JSON.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::collections::HashMap;

/// JSON media type
pub const APPLICATION_JSON: &str = "application/json";

/// HTTP response descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Serialized body, if any
    pub body: Option<String>,
    /// Whether the body is JSON and should be labelled as such
    pub json: bool,
    /// Extra response headers
    pub headers: HashMap<String, String>,
}

impl ApiResponse {
    /// Response with a JSON body
    #[must_use]
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(body.into()),
            json: true,
            headers: HashMap::new(),
        }
    }

    /// Response with a plain-text body and no content type
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(body.into()),
            json: false,
            headers: HashMap::new(),
        }
    }

    /// Response with no body
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: None,
            json: false,
            headers: HashMap::new(),
        }
    }

    /// Set header
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set or override a header
    pub fn set_header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_string(), value.to_string());
    }

    /// Look up a header set on this response
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// The content type this response will be sent with
    #[must_use]
    pub fn content_type(&self) -> Option<&'static str> {
        (self.json && self.body.is_some()).then_some(APPLICATION_JSON)
    }

    /// Convert to hyper Response
    pub fn into_hyper(self) -> Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        if let Some(content_type) = self.content_type() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        for (k, v) in &self.headers {
            if k.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                headers.insert(name, value);
            }
        }

        if let Some(body) = self.body {
            *response.body_mut() = Full::new(Bytes::from(body));
        }
        response
    }
}
