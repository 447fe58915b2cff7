//! # Validation Module
//!
//! Presence-only payload validation driven by a per-resource [`Schema`].
//!
//! A schema is an ordered list of required field names. Checking stops at the
//! first missing field, so a client fixes one problem per round trip and the
//! message is stable for a given payload.

use serde_json::Value;

/// Error code for categorizing validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    /// Required field is missing
    Required,
    /// Payload is not a JSON object
    InvalidType,
    /// Record id in the payload disagrees with the request path
    IdMismatch,
}

/// A single validation error for a specific field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Field name (e.g., "Email"); empty for whole-payload errors
    pub field: String,
    /// Human-readable error message, sent verbatim as the 400 body
    pub message: String,
    /// Machine-readable error code
    pub code: ValidationCode,
}

impl FieldError {
    /// Create a new field error
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: ValidationCode) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }

    /// Create a "missing field" error (`"Phone is missing"`)
    pub fn missing(field: impl Into<String>) -> Self {
        let field_str = field.into();
        Self {
            message: format!("{field_str} is missing"),
            field: field_str,
            code: ValidationCode::Required,
        }
    }

    /// Create the error for a payload that is valid JSON but not an object
    #[must_use]
    pub fn not_an_object() -> Self {
        Self::new(
            "",
            "Request body must be a JSON object",
            ValidationCode::InvalidType,
        )
    }

    /// Create the error for a body `Id` that differs from the path id
    #[must_use]
    pub fn id_mismatch() -> Self {
        Self::new(
            crate::store::ID_FIELD,
            "Id in body does not match Id in path",
            ValidationCode::IdMismatch,
        )
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result type for validation operations
pub type ValidationResult<T> = std::result::Result<T, FieldError>;

/// Required-field schema for one resource type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    required: Vec<String>,
}

impl Schema {
    /// Create a schema from required field names, checked in the given order
    pub fn required<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Required field names in check order
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.required
    }

    /// Check a payload for field presence
    ///
    /// Values are not inspected: `{"Name": null}` satisfies `Name`.
    ///
    /// # Errors
    ///
    /// Returns the first [`FieldError`] encountered.
    pub fn validate(&self, payload: &Value) -> ValidationResult<()> {
        let object = payload.as_object().ok_or_else(FieldError::not_an_object)?;
        match self.required.iter().find(|f| !object.contains_key(f.as_str())) {
            Some(missing) => Err(FieldError::missing(missing.as_str())),
            None => Ok(()),
        }
    }
}
