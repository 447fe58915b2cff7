//! # JSON Serialization Module
//!
//! Payload parsing with simd-json, serialization with serde_json.
//!
//! Parsed values are always `serde_json::Value` so records keep a single
//! in-memory representation from request body to store file.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Parse JSON bytes to a typed value using simd-json
///
/// simd-json parses in place, so the input is copied into a scratch buffer.
///
/// # Errors
///
/// Returns `Error::MalformedJson` if the bytes are not a valid JSON document
pub fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut scratch = bytes.to_vec();
    simd_json::from_slice(&mut scratch).map_err(|e| Error::MalformedJson {
        reason: e.to_string(),
    })
}

/// Serialize a value to JSON string
///
/// # Errors
///
/// Returns `Error::Json` if the value cannot be represented as JSON
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Serialize a value to pretty-printed JSON string
///
/// # Errors
///
/// Returns `Error::Json` if the value cannot be represented as JSON
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
