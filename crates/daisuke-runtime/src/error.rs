//! Error types for the Daisuke runtime.

use thiserror::Error;

/// Errors that can occur in the Daisuke runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Failed to parse runner manifest.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// The runner does not define the requested method.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// The runner script raised an error.
    #[error("{0}")]
    Script(String),

    /// Engine-level execution failure, including host calls made
    /// before a host was installed.
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
