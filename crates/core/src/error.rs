//! Error types for Devbox.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using Devbox's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Devbox.
///
/// Expected failures of file, patch and search operations are reported as
/// structured results, not as errors. This type covers bad tool arguments and
/// the conditions that have no meaningful partial result.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Tool Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    // =========================================================================
    // Container Errors
    // =========================================================================
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Command timed out after {timeout:?}: {command}")]
    Timeout { command: String, timeout: Duration },

    #[error("Container runtime error: {0}")]
    ContainerRuntime(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a tool not found error.
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound(name.into())
    }

    /// Create a container-not-found error.
    pub fn container_not_found(name: impl Into<String>) -> Self {
        Self::ContainerNotFound(name.into())
    }

    /// Create a container runtime error.
    pub fn container_runtime(msg: impl Into<String>) -> Self {
        Self::ContainerRuntime(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(command: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            command: command.into(),
            timeout,
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
