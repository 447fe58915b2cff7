//! # HTTP Server
//!
//! HTTP/1 server built on Hyper and Tokio.
//! Implements graceful shutdown with signal handling.
//!
//! ## Key Features
//!
//! - One task per connection; dispatch runs on the blocking pool because
//!   stores do synchronous file IO
//! - Graceful shutdown on Ctrl-C: open connections are told to close and
//!   given a bounded time to finish
//! - Environment-driven configuration
//! - Network-free request entry point for tests

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::middleware::{Middleware, MiddlewareChain, MiddlewareResult};
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Port used when `PORT` is not set
pub const DEFAULT_PORT: u16 = 5001;

/// HTTP Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Directory holding one `<collection>.json` file per resource
    pub data_dir: PathBuf,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], DEFAULT_PORT).into(),
            data_dir: PathBuf::from("."),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment
    ///
    /// Recognized keys: `HOST`, `PORT`, `DATA_DIR`, `MAX_BODY_SIZE`,
    /// `SHUTDOWN_TIMEOUT_SECS`. Unset keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a set value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a set value cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host: IpAddr = parse_var(&lookup, "HOST")?.unwrap_or(defaults.address.ip());
        let port: u16 = parse_var(&lookup, "PORT")?.unwrap_or(defaults.address.port());
        let max_body_size = parse_var(&lookup, "MAX_BODY_SIZE")?.unwrap_or(defaults.max_body_size);
        let shutdown_timeout = parse_var(&lookup, "SHUTDOWN_TIMEOUT_SECS")?
            .map_or(defaults.shutdown_timeout, Duration::from_secs);
        let data_dir = lookup("DATA_DIR")
            .filter(|dir| !dir.is_empty())
            .map_or(defaults.data_dir, PathBuf::from);

        Ok(Self {
            address: SocketAddr::new(host, port),
            data_dir,
            shutdown_timeout,
            max_body_size,
            ..defaults
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| Error::Config {
                key: key.to_string(),
                reason: format!("'{raw}': {e}"),
            })
        })
        .transpose()
}

/// HTTP server fronting a [`Dispatcher`]
pub struct Server {
    config: ServerConfig,
    dispatcher: Dispatcher,
    middleware: MiddlewareChain,
}

impl Server {
    /// Create a new Server instance
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher,
            middleware: MiddlewareChain::new(),
        }
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Add a middleware to the chain
    pub fn add_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middleware.add(middleware);
    }

    /// Bind the configured address
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` if the address is unavailable.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.address;
        TcpListener::bind(addr).await.map_err(|source| Error::BindError {
            address: addr.to_string(),
            source,
        })
    }

    /// Bind and serve until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns an error if binding or accepting connections fails.
    pub async fn serve(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.run(listener, shutdown_signal()).await
    }

    /// Serve connections from `listener` until `shutdown` resolves, then ask
    /// open connections to close and wait up to the configured timeout
    ///
    /// # Errors
    ///
    /// Returns an error if accepting a connection fails.
    pub async fn run<S>(&self, listener: TcpListener, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        info!("Server listening on http://{}", listener.local_addr()?);

        let dispatcher = self.dispatcher.clone();
        let middleware = Arc::new(self.middleware.clone());
        let connections = GracefulShutdown::new();
        let max_body_size = self.config.max_body_size;
        let keep_alive = self.config.keep_alive;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let io = TokioIo::new(stream);

                    let dispatcher = dispatcher.clone();
                    let middleware = middleware.clone();
                    let service = service_fn(move |req| {
                        let dispatcher = dispatcher.clone();
                        let middleware = middleware.clone();
                        async move {
                            let resp = handle_request(req, remote_addr, dispatcher, &middleware, max_body_size).await;
                            Ok::<_, std::convert::Infallible>(resp)
                        }
                    });

                    let conn = http1::Builder::new()
                        .keep_alive(keep_alive)
                        .serve_connection(io, service);
                    let conn = connections.watch(conn);
                    tokio::task::spawn(async move {
                        if let Err(err) = conn.await {
                            error!(%remote_addr, "Error serving connection: {:?}", err);
                        }
                    });
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        // Idle keep-alive connections close now; busy ones after their response.
        drop(listener);
        tokio::select! {
            () = connections.shutdown() => {
                info!("All connections closed");
            }
            () = tokio::time::sleep(self.config.shutdown_timeout) => {
                warn!("Shutdown timeout elapsed with connections still open");
            }
        }
        Ok(())
    }

    /// Execute a test request directly without network stack
    pub async fn test_request(&self, req: ApiRequest) -> ApiResponse {
        if req.body_bytes().map_or(0, <[u8]>::len) > self.config.max_body_size {
            return ApiResponse::text(413, "Payload Too Large");
        }
        process_request(req, self.dispatcher.clone(), &self.middleware).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Core request processing logic (network agnostic)
async fn process_request(
    mut req: ApiRequest,
    dispatcher: Dispatcher,
    middleware: &MiddlewareChain,
) -> ApiResponse {
    if req.header("x-request-id").is_none() {
        let request_id = generate_request_id();
        req.set_header("x-request-id", &request_id);
    }

    let mut response = match middleware.run_before(&req) {
        MiddlewareResult::Continue => {
            let dispatched = req.clone();
            tokio::task::spawn_blocking(move || dispatcher.handle(&dispatched))
                .await
                .unwrap_or_else(|e| {
                    error!("Dispatch task failed: {}", e);
                    ApiResponse::text(500, "Internal Server Error")
                })
        }
        MiddlewareResult::Respond(resp) => resp,
    };

    if let Some(request_id) = req.header("x-request-id") {
        response.set_header("x-request-id", request_id);
    }
    middleware.run_after(&req, &mut response);
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
    dispatcher: Dispatcher,
    middleware: &MiddlewareChain,
    max_body_size: usize,
) -> Response<Full<Bytes>> {
    let request = match ApiRequest::from_hyper_with_limit(req, max_body_size).await {
        Ok(r) => r,
        Err(Error::PayloadTooLarge { limit }) => {
            warn!(%remote_addr, limit, "Rejected oversized request body");
            return ApiResponse::text(413, "Payload Too Large").into_hyper();
        }
        Err(e) => {
            error!(%remote_addr, "Failed to read request: {}", e);
            return ApiResponse::text(400, "Bad Request").into_hyper();
        }
    };

    process_request(request, dispatcher, middleware)
        .await
        .into_hyper()
}

static REQUEST_COUNTER: AtomicUsize = AtomicUsize::new(1);

fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now.as_nanos(), counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{CorsMiddleware, LoggingMiddleware};
    use crate::router::{Method, Registry, ResourceType};
    use crate::store::{JsonFileStoreFactory, MemoryStoreFactory, StoreFactory};
    use crate::validation::Schema;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(ResourceType::new(
                "contact",
                Schema::required(["Name", "Phone", "Email"]),
            ))
            .unwrap()
            .register(ResourceType::new(
                "bookmark",
                Schema::required(["Title", "Url", "Category"]),
            ))
            .unwrap();
        registry
    }

    fn server_with(stores: Arc<dyn StoreFactory>, config: ServerConfig) -> Server {
        let mut server = Server::new(config, Dispatcher::new(registry(), stores));
        server.add_middleware(LoggingMiddleware::new());
        server.add_middleware(CorsMiddleware::new());
        server
    }

    fn server() -> Server {
        server_with(Arc::new(MemoryStoreFactory::new()), ServerConfig::default())
    }

    fn bare(method: Method, path: &str) -> ApiRequest {
        ApiRequest::new(method, path, HashMap::new(), None)
    }

    fn post_contact(name: &str) -> ApiRequest {
        ApiRequest::json(
            Method::Post,
            "/api/contacts",
            json!({"Name": name, "Phone": "1", "Email": "a@x"}).to_string(),
        )
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), 5001);
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert!(config.keep_alive);
    }

    #[test]
    fn test_config_from_lookup() {
        let vars = HashMap::from([
            ("HOST", "0.0.0.0"),
            ("PORT", "8080"),
            ("DATA_DIR", "/var/lib/flatrest"),
            ("MAX_BODY_SIZE", "2048"),
            ("SHUTDOWN_TIMEOUT_SECS", "5"),
        ]);
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.address, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/flatrest"));
        assert_eq!(config.max_body_size, 2048);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_defaults_when_unset() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_config_rejects_bad_port() {
        let err = ServerConfig::from_lookup(|k| (k == "PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config { ref key, .. } if key == "PORT"));
    }

    #[test]
    fn test_request_id_is_unique() {
        assert_ne!(generate_request_id(), generate_request_id());
    }

    #[tokio::test]
    async fn test_create_contact() {
        let resp = server().test_request(post_contact("A")).await;
        assert_eq!(resp.status, 201);
        assert_eq!(resp.content_type(), Some("application/json"));
        assert_eq!(
            resp.body.as_deref(),
            Some(r#"{"Id":1,"Name":"A","Phone":"1","Email":"a@x"}"#)
        );
        assert!(resp.header("x-request-id").is_some());
    }

    #[tokio::test]
    async fn test_create_contact_missing_phone() {
        let req = ApiRequest::json(Method::Post, "/api/contacts", r#"{"Name":"A"}"#);
        let resp = server().test_request(req).await;
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body.as_deref(), Some("Phone is missing"));
        assert_eq!(resp.content_type(), None);
    }

    #[tokio::test]
    async fn test_get_unknown_contact() {
        let resp = server().test_request(bare(Method::Get, "/api/contacts/999")).await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body.as_deref(), Some("contact 999 not found"));
    }

    #[tokio::test]
    async fn test_put_existing_bookmark() {
        let server = server();
        let created = server
            .test_request(ApiRequest::json(
                Method::Post,
                "/api/bookmarks",
                r#"{"Title":"x","Url":"y","Category":"z"}"#,
            ))
            .await;
        assert_eq!(created.status, 201);

        let resp = server
            .test_request(ApiRequest::json(
                Method::Put,
                "/api/bookmarks/1",
                r#"{"Id":1,"Title":"t","Url":"u","Category":"c"}"#,
            ))
            .await;
        assert_eq!(resp.status, 204);
        assert_eq!(resp.body, None);
    }

    #[tokio::test]
    async fn test_delete_invalid_id() {
        let resp = server().test_request(bare(Method::Delete, "/api/contacts/abc")).await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body, None);
    }

    #[tokio::test]
    async fn test_patch_not_supported() {
        let resp = server().test_request(bare(Method::Patch, "/api/contacts")).await;
        assert_eq!(resp.status, 501);
        assert_eq!(
            resp.body.as_deref(),
            Some("PATCH method not supported by this service.")
        );
    }

    #[tokio::test]
    async fn test_unmatched_path() {
        let resp = server().test_request(bare(Method::Get, "/api/users")).await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body, None);
    }

    #[tokio::test]
    async fn test_preflight_on_any_path() {
        let headers = HashMap::from([("Sec-Fetch-Mode".to_string(), "cors".to_string())]);
        let req = ApiRequest::new(Method::Options, "/anything", headers, None);
        let resp = server().test_request(req).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, None);
        assert_eq!(resp.header("Access-Control-Allow-Origin"), Some("*"));
    }

    #[tokio::test]
    async fn test_cors_headers_on_crud_response() {
        let headers = HashMap::from([("Sec-Fetch-Mode".to_string(), "cors".to_string())]);
        let req = ApiRequest::new(Method::Get, "/api/contacts", headers, None);
        let resp = server().test_request(req).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.header("Access-Control-Expose-Headers"), Some("*"));

        let resp = server().test_request(bare(Method::Get, "/api/contacts")).await;
        assert_eq!(resp.header("Access-Control-Allow-Origin"), None);
    }

    #[tokio::test]
    async fn test_client_request_id_is_echoed() {
        let headers = HashMap::from([("X-Request-Id".to_string(), "abc-123".to_string())]);
        let req = ApiRequest::new(Method::Get, "/api/bookmarks", headers, None);
        let resp = server().test_request(req).await;
        assert_eq!(resp.header("x-request-id"), Some("abc-123"));
    }

    #[tokio::test]
    async fn test_oversized_body() {
        let config = ServerConfig {
            max_body_size: 8,
            ..ServerConfig::default()
        };
        let server = server_with(Arc::new(MemoryStoreFactory::new()), config);
        let resp = server.test_request(post_contact("A")).await;
        assert_eq!(resp.status, 413);
    }

    #[test]
    fn test_full_lifecycle_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_with(
            Arc::new(JsonFileStoreFactory::new(dir.path())),
            ServerConfig::default(),
        );

        tokio_test::block_on(async {
            for name in ["A", "B"] {
                assert_eq!(server.test_request(post_contact(name)).await.status, 201);
            }
            let deleted = server.test_request(bare(Method::Delete, "/api/contacts/1")).await;
            assert_eq!(deleted.status, 202);

            let listed = server.test_request(bare(Method::Get, "/api/contacts")).await;
            let records: Value = serde_json::from_str(listed.body.as_deref().unwrap()).unwrap();
            assert_eq!(records, json!([{"Id": 2, "Name": "B", "Phone": "1", "Email": "a@x"}]));
        });

        let on_disk = std::fs::read_to_string(dir.path().join("contacts.json")).unwrap();
        let on_disk: Value = serde_json::from_str(&on_disk).unwrap();
        assert_eq!(on_disk[0]["Id"], 2);
    }

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let config = ServerConfig {
            address: ([127, 0, 0, 1], 0).into(),
            shutdown_timeout: Duration::from_secs(1),
            ..ServerConfig::default()
        };
        let server = server_with(Arc::new(MemoryStoreFactory::new()), config);
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            server
                .run(listener, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let body = r#"{"Name":"A","Phone":"1","Email":"a@x"}"#;
        let raw = format!(
            "POST /api/contacts HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();

        assert!(reply.starts_with("HTTP/1.1 201"), "unexpected reply: {reply}");
        assert!(reply.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(reply.ends_with(r#"{"Id":1,"Name":"A","Phone":"1","Email":"a@x"}"#));

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    async fn spawn_server(
        config: ServerConfig,
    ) -> (
        SocketAddr,
        tokio::sync::oneshot::Sender<()>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let server = server_with(Arc::new(MemoryStoreFactory::new()), config);
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .run(listener, async {
                    let _ = stop_rx.await;
                })
                .await
        });
        (addr, stop_tx, handle)
    }

    #[tokio::test]
    async fn test_oversized_chunked_body_rejected_before_end() {
        let config = ServerConfig {
            address: ([127, 0, 0, 1], 0).into(),
            max_body_size: 8,
            shutdown_timeout: Duration::from_secs(1),
            ..ServerConfig::default()
        };
        let (addr, stop_tx, handle) = spawn_server(config).await;

        // One 64-byte chunk and no terminating chunk: the server must answer
        // without waiting for the rest of the body.
        let chunk = "x".repeat(64);
        let raw = format!(
            "POST /api/contacts HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n40\r\n{chunk}\r\n"
        );
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();

        let mut buf = vec![0u8; 1024];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("server waited for the whole body")
            .unwrap();
        let reply = String::from_utf8_lossy(&buf[..n]);
        assert!(reply.starts_with("HTTP/1.1 413"), "unexpected reply: {reply}");

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_keep_alive_connection() {
        let config = ServerConfig {
            address: ([127, 0, 0, 1], 0).into(),
            shutdown_timeout: Duration::from_secs(30),
            ..ServerConfig::default()
        };
        let (addr, stop_tx, handle) = spawn_server(config).await;

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /api/contacts HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut reply = Vec::new();
        let mut buf = [0u8; 512];
        while !reply.ends_with(b"[]") {
            let n = stream.read(&mut buf).await.unwrap();
            assert_ne!(n, 0, "connection closed before the response");
            reply.extend_from_slice(&buf[..n]);
        }

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("idle connection held up shutdown")
            .unwrap()
            .unwrap();
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }
}
