//! Error types for Ralph
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Ralph
#[derive(Debug, Error)]
pub enum RalphError {
    /// Unreadable or invalid loop configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Telemetry could not be appended after retries
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Another runner holds a live PID record for this project
    #[error("Runner already live with pid {0}")]
    AlreadyRunning(i32),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Dashboard API returned an error status
    #[error("Dashboard error: {0}")]
    Dashboard(String),

    /// Dashboard call attempted without a token
    #[error("Not authenticated: call login first")]
    NotAuthenticated,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Ralph operations
pub type Result<T> = std::result::Result<T, RalphError>;
