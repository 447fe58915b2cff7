//! # Error Handling
//!
//! Centralized error types for flatrest core.
//! Uses `thiserror` for ergonomic error definitions.

use thiserror::Error;

/// Result type alias for flatrest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the flatrest runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// A collection store could not be read or written
    #[error("Store error for collection '{collection}': {source}")]
    Store {
        /// Plural collection name (e.g. "contacts")
        collection: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A collection store exists but does not hold a JSON array of records
    #[error("Corrupt store for collection '{collection}': {reason}")]
    CorruptStore {
        /// Plural collection name
        collection: String,
        /// What was wrong with the stored document
        reason: String,
    },

    /// A configuration value could not be parsed
    #[error("Invalid configuration for {key}: {reason}")]
    Config {
        /// Configuration key (environment variable name)
        key: String,
        /// Reason for rejection
        reason: String,
    },

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request body was not valid JSON
    #[error("Malformed JSON payload: {reason}")]
    MalformedJson {
        /// Parser diagnostic
        reason: String,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A collection has handed out every representable id
    #[error("No ids left in collection '{collection}' after {last}")]
    IdsExhausted {
        /// Plural collection name
        collection: String,
        /// Highest id already stored
        last: i64,
    },

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = Error::BindError {
            address: "0.0.0.0:5001".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("0.0.0.0:5001"));
    }

    #[test]
    fn test_store_error_names_collection() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = Error::Store {
            collection: "contacts".to_string(),
            source: io_err,
        };
        assert!(err.to_string().contains("contacts"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_error() {
        let err = Error::Config {
            key: "PORT".to_string(),
            reason: "invalid digit found in string".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration for PORT: invalid digit found in string"
        );
    }
}
