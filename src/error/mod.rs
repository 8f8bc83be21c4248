//! Error types and handling for `streamsync`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Accepts `anyhow` errors at the edges through [`SyncError::Other`]
//! - Separates transport failures (handled by the stream error policy) from
//!   storage failures (propagated to the caller of a poll step)
//! - Maps errors to process exit codes for the CLI

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `streamsync` operations.
#[derive(Error, Debug)]
pub enum SyncError {
    // === Storage Errors ===
    /// Database file not found at the specified path.
    #[error("Database not found at '{path}'")]
    DatabaseNotFound { path: PathBuf },

    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // === Remote Errors ===
    /// The HTTP request could not be sent or its body could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote API answered with a non-success status.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// A 200 response whose body did not decode as the expected payload.
    #[error("Malformed response from {path}: {source}")]
    Decode {
        path: String,
        source: serde_json::Error,
    },

    /// A queued request was dropped before it ran.
    #[error("Request cancelled: {owner}")]
    Cancelled { owner: String },

    // === Stream / Issue Errors ===
    /// Stream with the specified ID was not found.
    #[error("Stream not found: {id}")]
    StreamNotFound { id: i64 },

    /// Negative stream id that is not one of the built-in system streams.
    #[error("Unknown system stream: {id}")]
    UnknownSystemStream { id: i64 },

    /// Issue with the specified ID was not found.
    #[error("Issue not found: {id}")]
    IssueNotFound { id: i64 },

    // === Validation Errors ===
    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    // === Configuration Errors ===
    /// Configuration file or value error.
    #[error("Configuration error: {0}")]
    Config(String),

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Failure that came from talking to the remote API.
    ///
    /// These are handled by a stream's error policy rather than propagated.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Api { .. } | Self::Decode { .. } | Self::Cancelled { .. }
        )
    }

    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseNotFound { .. }
                | Self::StreamNotFound { .. }
                | Self::UnknownSystemStream { .. }
                | Self::IssueNotFound { .. }
                | Self::Validation { .. }
                | Self::Config(_)
                | Self::Yaml(_)
        )
    }

    /// Process exit code for the CLI.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::DatabaseNotFound { .. } | Self::Database(_) => 2,
            Self::Http(_) | Self::Api { .. } | Self::Decode { .. } | Self::Cancelled { .. } => 3,
            Self::StreamNotFound { .. }
            | Self::UnknownSystemStream { .. }
            | Self::IssueNotFound { .. } => 4,
            Self::Validation { .. } | Self::Config(_) | Self::Yaml(_) => 5,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => 1,
        }
    }

    /// Short machine-readable code used in JSON error output.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DatabaseNotFound { .. } => "DATABASE_NOT_FOUND",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Api { .. } => "API_ERROR",
            Self::Decode { .. } => "DECODE_ERROR",
            Self::Cancelled { .. } => "CANCELLED",
            Self::StreamNotFound { .. } => "STREAM_NOT_FOUND",
            Self::UnknownSystemStream { .. } => "UNKNOWN_SYSTEM_STREAM",
            Self::IssueNotFound { .. } => "ISSUE_NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_FAILED",
            Self::Config(_) | Self::Yaml(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Create a validation error.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an API error from a status and response body.
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }

    /// JSON payload for `--json` error output.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "retryable": self.is_transport(),
            }
        })
    }
}

/// Result type using `SyncError`.
pub type Result<T> = std::result::Result<T, SyncError>;
