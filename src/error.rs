//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout Maetrik.
//! Every error maps to a stable error code and an HTTP-equivalent status so
//! callers can tell "not found" from "conflict" from "bad input" without
//! parsing messages.
//!
//! # Error Categories
//! - Resolution: `NotFound`, `DuplicateConflict`, `ConnectionExists`, `ConnectionDisabled`
//! - Registry: `DriverNotFound`, `DuplicateFactory`
//! - Capability: `CapabilityNotSupported`
//! - Translation: `TranslationParse`, `InvalidQuery`, `CompletionFailed`
//! - Drivers: `ConnectionFailed`, `QueryFailed`, `EngineError`, `InvalidCredentials`
//! - Infrastructure: `ConfigError`, `StoreError`, `InvalidInput`

use thiserror::Error;

use crate::capability::Capability;

/// Main error type for Maetrik operations
#[derive(Error, Debug)]
pub enum MaetrikError {
    /// No configuration source knows the connection id
    #[error("Connection not found: {0}")]
    NotFound(String),

    /// The same connection id is claimed by more than one configuration source
    #[error("Duplicate connection '{id}' found in: {}", .sources.join(", "))]
    DuplicateConflict { id: String, sources: Vec<String> },

    /// No factory is registered for the data source type
    #[error("No driver found for type: {0}")]
    DriverNotFound(String),

    /// A factory for the type was already registered
    #[error("Data source factory '{0}' is already registered")]
    DuplicateFactory(String),

    /// The persisted store already holds the connection id
    #[error("Connection '{0}' already exists")]
    ConnectionExists(String),

    /// The persisted connection exists but is switched off
    #[error("Connection '{0}' is disabled")]
    ConnectionDisabled(String),

    /// The driver does not implement the requested capability
    #[error("Data source '{driver}' does not support {capability}")]
    CapabilityNotSupported { driver: String, capability: Capability },

    /// The completion backend answered with something that is not a translation
    #[error("Failed to parse LLM response: {raw}")]
    TranslationParse { raw: String },

    /// The generated or submitted statement is not a read-only query
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Credentials rejected by the data source factory
    #[error("Invalid credentials for '{source_type}': {detail}")]
    InvalidCredentials { source_type: String, detail: String },

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Data source connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Engine-specific database error
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },

    /// The completion backend could not be reached or returned an error status
    #[error("Completion failed: {0}")]
    CompletionFailed(String),

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Persisted connection store failure
    #[error("Connection store error: {0}")]
    StoreError(String),
}

impl MaetrikError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "CONNECTION_NOT_FOUND",
            Self::DuplicateConflict { .. } => "DUPLICATE_CONNECTION",
            Self::DriverNotFound(_) => "DRIVER_NOT_FOUND",
            Self::DuplicateFactory(_) => "DUPLICATE_FACTORY",
            Self::ConnectionExists(_) => "CONNECTION_EXISTS",
            Self::ConnectionDisabled(_) => "CONNECTION_DISABLED",
            Self::CapabilityNotSupported { .. } => "NOT_SUPPORTED",
            Self::TranslationParse { .. } => "TRANSLATION_PARSE_ERROR",
            Self::InvalidQuery(_) => "INVALID_QUERY",
            Self::InvalidCredentials { .. } => "INVALID_CREDENTIALS",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::EngineError { .. } => "ENGINE_ERROR",
            Self::CompletionFailed(_) => "COMPLETION_FAILED",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::StoreError(_) => "STORE_ERROR",
        }
    }

    /// HTTP-equivalent status for the error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) | Self::DriverNotFound(_) => 404,
            Self::DuplicateConflict { .. } | Self::ConnectionExists(_) => 409,
            Self::CapabilityNotSupported { .. }
            | Self::TranslationParse { .. }
            | Self::InvalidQuery(_)
            | Self::InvalidCredentials { .. }
            | Self::InvalidInput(_)
            | Self::ConnectionDisabled(_) => 400,
            Self::ConnectionFailed(_) | Self::CompletionFailed(_) => 502,
            Self::DuplicateFactory(_)
            | Self::QueryFailed(_)
            | Self::EngineError { .. }
            | Self::ConfigError(_)
            | Self::StoreError(_) => 500,
        }
    }

    /// Get human-readable error message
    ///
    /// Messages never contain credentials.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create a not-found error for a connection id
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create a conflict error naming every source that claims the id
    pub fn duplicate_conflict(id: impl Into<String>, sources: Vec<String>) -> Self {
        Self::DuplicateConflict { id: id.into(), sources }
    }

    /// Create a driver-not-found error
    pub fn driver_not_found(source_type: impl Into<String>) -> Self {
        Self::DriverNotFound(source_type.into())
    }

    /// Create an unsupported-capability error
    pub fn capability_not_supported(driver: impl Into<String>, capability: Capability) -> Self {
        Self::CapabilityNotSupported { driver: driver.into(), capability }
    }

    /// Create a translation parse error carrying the raw backend output
    pub fn translation_parse(raw: impl Into<String>) -> Self {
        Self::TranslationParse { raw: raw.into() }
    }

    /// Create an invalid query error
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    /// Create an invalid credentials error
    pub fn invalid_credentials(source_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidCredentials { source_type: source_type.into(), detail: detail.into() }
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }

    /// Create a completion backend error
    pub fn completion_failed(message: impl Into<String>) -> Self {
        Self::CompletionFailed(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a connection store error
    pub fn store_error(message: impl Into<String>) -> Self {
        Self::StoreError(message.into())
    }
}

/// Result type alias for Maetrik operations
pub type Result<T> = std::result::Result<T, MaetrikError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(MaetrikError::not_found("x").error_code(), "CONNECTION_NOT_FOUND");
        assert_eq!(
            MaetrikError::duplicate_conflict("x", vec!["file".into()]).error_code(),
            "DUPLICATE_CONNECTION"
        );
        assert_eq!(MaetrikError::driver_not_found("x").error_code(), "DRIVER_NOT_FOUND");
        assert_eq!(
            MaetrikError::capability_not_supported("csv", Capability::Transactional).error_code(),
            "NOT_SUPPORTED"
        );
        assert_eq!(MaetrikError::translation_parse("x").error_code(), "TRANSLATION_PARSE_ERROR");
        assert_eq!(MaetrikError::invalid_query("x").error_code(), "INVALID_QUERY");
        assert_eq!(MaetrikError::engine_error("mysql", "x").error_code(), "ENGINE_ERROR");
        assert_eq!(MaetrikError::config_error("x").error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(MaetrikError::not_found("x").http_status(), 404);
        assert_eq!(MaetrikError::duplicate_conflict("x", vec![]).http_status(), 409);
        assert_eq!(MaetrikError::invalid_query("x").http_status(), 400);
        assert_eq!(MaetrikError::translation_parse("x").http_status(), 400);
        assert_eq!(MaetrikError::completion_failed("x").http_status(), 502);
        assert_eq!(MaetrikError::store_error("x").http_status(), 500);
    }

    #[test]
    fn test_duplicate_conflict_names_every_source() {
        let err = MaetrikError::duplicate_conflict(
            "analytics",
            vec!["file".to_string(), "database".to_string()],
        );
        assert_eq!(err.message(), "Duplicate connection 'analytics' found in: file, database");
    }

    #[test]
    fn test_translation_parse_keeps_raw_text() {
        let err = MaetrikError::translation_parse("I cannot help with that");
        assert_eq!(err.message(), "Failed to parse LLM response: I cannot help with that");
    }

    #[test]
    fn test_error_messages() {
        let err = MaetrikError::capability_not_supported("csv", Capability::Queryable);
        assert!(err.message().contains("csv"));
        assert!(err.message().contains("queryable"));

        let err = MaetrikError::engine_error("postgres", "connection timeout");
        assert!(err.message().contains("postgres"));
        assert!(err.message().contains("connection timeout"));
    }
}
