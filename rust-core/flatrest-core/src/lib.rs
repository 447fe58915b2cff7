//! # flatrest Core
//!
//! Generic JSON CRUD service over flat-file collections.
//!
//! ## Architecture
//!
//! One dispatch algorithm serves every registered resource type. A request is
//! matched to a resource and a target (collection or item), validated against
//! the resource's required-field schema when it mutates, applied to a store
//! opened for that request, and answered with a response descriptor.
//!
//! ## Modules
//!
//! - `server` - HTTP server built on Hyper, plus configuration
//! - `router` - Resource registry and URL matching using matchit
//! - `dispatch` - The CRUD state machine over (target, method)
//! - `request` - Request descriptor and payload classification
//! - `response` - Response descriptor and hyper conversion
//! - `middleware` - CORS/preflight and access logging
//! - `json` - JSON parsing with simd-json
//! - `validation` - Required-field schemas
//! - `store` - Persistence contract, flat-file and in-memory stores
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod dispatch;
pub mod error;
pub mod json;
pub mod middleware;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod store;
pub mod validation;

pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use json::{parse_json, to_json};
pub use middleware::{CorsMiddleware, LoggingMiddleware, Middleware, MiddlewareChain};
pub use request::{ApiRequest, Payload};
pub use response::ApiResponse;
pub use router::{Method, Registry, ResourceType, Target};
pub use server::{Server, ServerConfig};
pub use store::{
    JsonFileStore, JsonFileStoreFactory, MemoryStoreFactory, Record, Store, StoreFactory,
};
pub use validation::{FieldError, Schema, ValidationCode, ValidationResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
