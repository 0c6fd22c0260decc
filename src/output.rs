//! JSON Output Envelope Types
//!
//! Every CLI command prints exactly one envelope to stdout.
//!
//! # Output Contract
//! - Success: `{"success": true, "command": "...", "connection": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"success": false, "command": "...", "connection": "...", "error": {"code": "...", "message": "...", "status": 404}}`
//!
//! `connection` is omitted for commands that do not target one. `meta` is the
//! command's own metadata (`AskMeta` for `ask`) or the generic [`Metadata`].

use serde::{Deserialize, Serialize};

use crate::error::MaetrikError;

/// Success envelope for command results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T, M = Metadata> {
    /// Always true for success envelopes
    pub success: bool,

    /// Command that was executed (datasources, connections, introspect, query, ask)
    pub command: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    pub data: T,

    pub meta: M,
}

impl<T, M> SuccessEnvelope<T, M> {
    pub fn new(command: impl Into<String>, connection: Option<&str>, data: T, meta: M) -> Self {
        Self {
            success: true,
            command: command.into(),
            connection: connection.map(str::to_string),
            data,
            meta,
        }
    }
}

/// Error envelope for command failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub success: bool,

    pub command: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(command: impl Into<String>, connection: Option<&str>, error: ErrorInfo) -> Self {
        Self {
            success: false,
            command: command.into(),
            connection: connection.map(str::to_string),
            error,
        }
    }

    pub fn from_error(command: impl Into<String>, connection: Option<&str>, err: &MaetrikError) -> Self {
        Self::new(command, connection, ErrorInfo::from(err))
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "CONNECTION_NOT_FOUND", "INVALID_QUERY")
    pub code: String,

    /// Human-readable message; never carries credentials
    pub message: String,

    /// HTTP-style status for the error class
    pub status: u16,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self { code: code.into(), message: message.into(), status }
    }
}

impl From<&MaetrikError> for ErrorInfo {
    fn from(err: &MaetrikError) -> Self {
        Self::new(err.error_code(), err.message(), err.http_status())
    }
}

/// Metadata for commands without their own
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Execution time in milliseconds
    pub duration_ms: u64,

    /// Number of items in `data`, when it is a list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl Metadata {
    pub fn new(duration_ms: u64) -> Self {
        Self { duration_ms, count: None }
    }

    pub fn with_count(duration_ms: u64, count: usize) -> Self {
        Self { duration_ms, count: Some(count) }
    }
}
