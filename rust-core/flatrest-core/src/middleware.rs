//! # Middleware System
//!
//! Request/response interception for boundary concerns that sit outside
//! CRUD dispatch: cross-origin headers, preflight answers, access logging.

use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::router::Method;
use std::sync::Arc;
use tracing::{debug, info};

/// Middleware trait for request/response interception
///
/// Middlewares are called in order before the handler, and in reverse order after.
pub trait Middleware: Send + Sync {
    /// Called before the request handler
    ///
    /// Can return early with a response, skipping dispatch.
    fn before_request(&self, _req: &ApiRequest) -> MiddlewareResult {
        MiddlewareResult::Continue
    }

    /// Called after the request handler, including for short-circuited requests
    fn after_response(&self, _req: &ApiRequest, _res: &mut ApiResponse) {}

    /// Middleware name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

/// Result of middleware execution
#[derive(Debug)]
pub enum MiddlewareResult {
    /// Continue to next middleware/handler
    Continue,
    /// Short-circuit with this response (skip handler)
    Respond(ApiResponse),
}

/// Middleware chain for processing requests
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.middlewares.iter().map(|m| m.name()))
            .finish()
    }
}

impl MiddlewareChain {
    /// Create a new empty middleware chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the chain
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Arc::new(middleware));
    }

    /// Execute `before_request` for all middlewares
    pub fn run_before(&self, req: &ApiRequest) -> MiddlewareResult {
        for mw in &self.middlewares {
            match mw.before_request(req) {
                MiddlewareResult::Continue => continue,
                result => {
                    debug!(middleware = mw.name(), "Request short-circuited");
                    return result;
                }
            }
        }
        MiddlewareResult::Continue
    }

    /// Execute `after_response` for all middlewares (in reverse order)
    pub fn run_after(&self, req: &ApiRequest, res: &mut ApiResponse) {
        for mw in self.middlewares.iter().rev() {
            mw.after_response(req, res);
        }
    }

    /// Get the number of middlewares
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Check if chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

/// Logging middleware - one structured line per request and response
#[derive(Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    /// Create a new logging middleware
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for LoggingMiddleware {
    fn before_request(&self, req: &ApiRequest) -> MiddlewareResult {
        let request_id = req.header("x-request-id").unwrap_or("-");
        debug!(
            method = %req.method,
            path = %req.path,
            request_id = %request_id,
            "Request received"
        );
        MiddlewareResult::Continue
    }

    fn after_response(&self, req: &ApiRequest, res: &mut ApiResponse) {
        let request_id = req.header("x-request-id").unwrap_or("-");
        info!(
            method = %req.method,
            path = %req.path,
            status = res.status,
            request_id = %request_id,
            "Response sent"
        );
    }

    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }
}

/// CORS middleware
///
/// Answers every `OPTIONS` request as a preflight with an empty 200, and adds
/// wildcard `Access-Control-*` headers when the browser marks the request
/// with `Sec-Fetch-Mode: cors`.
#[derive(Clone)]
pub struct CorsMiddleware {
    allow_origin: String,
    allow_methods: String,
    allow_headers: String,
    expose_headers: String,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "*".to_string(),
            allow_headers: "*".to_string(),
            expose_headers: "*".to_string(),
        }
    }
}

impl CorsMiddleware {
    /// Create a new CORS middleware with wildcard settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn is_cors(req: &ApiRequest) -> bool {
        req.header("sec-fetch-mode")
            .is_some_and(|mode| mode.eq_ignore_ascii_case("cors"))
    }
}

impl Middleware for CorsMiddleware {
    fn before_request(&self, req: &ApiRequest) -> MiddlewareResult {
        if req.method == Method::Options {
            debug!(path = %req.path, "CORS preflight");
            return MiddlewareResult::Respond(ApiResponse::empty(200));
        }
        MiddlewareResult::Continue
    }

    fn after_response(&self, req: &ApiRequest, res: &mut ApiResponse) {
        if !Self::is_cors(req) {
            return;
        }
        res.set_header("Access-Control-Allow-Origin", &self.allow_origin);
        res.set_header("Access-Control-Allow-Methods", &self.allow_methods);
        res.set_header("Access-Control-Allow-Headers", &self.allow_headers);
        res.set_header("Access-Control-Expose-Headers", &self.expose_headers);
    }

    fn name(&self) -> &'static str {
        "CorsMiddleware"
    }
}
