//! # flatrest server
//!
//! Serves the contacts and bookmarks collections as a JSON API.
//!
//! Configuration comes from the environment (`HOST`, `PORT`, `DATA_DIR`,
//! `MAX_BODY_SIZE`, `SHUTDOWN_TIMEOUT_SECS`); logging honours `RUST_LOG`, and
//! `LOG_FORMAT=json` switches to JSON lines.

use anyhow::Context;
use flatrest_core::{
    CorsMiddleware, Dispatcher, JsonFileStoreFactory, LoggingMiddleware, Registry, ResourceType,
    Schema, Server, ServerConfig,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for the process
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("flatrest=info,flatrest_core=info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = installed {
        eprintln!("tracing already initialized: {e}");
    }
}

/// The resources this service exposes, in matching order
fn resources() -> anyhow::Result<Registry> {
    let mut registry = Registry::new();
    registry
        .register(ResourceType::new(
            "contact",
            Schema::required(["Name", "Phone", "Email"]),
        ))?
        .register(ResourceType::new(
            "bookmark",
            Schema::required(["Title", "Url", "Category"]),
        ))?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::from_env().context("reading configuration")?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;
    info!(
        address = %config.address,
        data_dir = %config.data_dir.display(),
        "Starting flatrest"
    );

    let stores = Arc::new(JsonFileStoreFactory::new(&config.data_dir));
    let dispatcher = Dispatcher::new(resources()?, stores);

    let mut server = Server::new(config, dispatcher);
    server.add_middleware(LoggingMiddleware::new());
    server.add_middleware(CorsMiddleware::new());

    server.serve().await.context("serving HTTP")?;
    info!("Server stopped");
    Ok(())
}
