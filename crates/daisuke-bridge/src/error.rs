//! Error types for the runner bridge.

use daisuke_runtime::RuntimeError;
use thiserror::Error;

/// Errors raised while bridging calls between the host and runners.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A capability object was used outside of any runner context.
    #[error("Runner not found on contained object")]
    RunnerNotFoundOnContainedObject,

    /// The enclosing runner binding has no readable id.
    #[error("Unable to fetch runner id in contained object")]
    UnableToFetchRunnerId,

    /// The value store has no value for the key.
    #[error("Value not found")]
    ValueNotFound,

    /// A value store key crossing the script boundary is not a string.
    #[error("Value store key is not a string")]
    KeyIsNotString,

    /// A value store key or value could not be converted to a string.
    #[error("Value store key-value pair is invalid")]
    KeyValuePairInvalid,

    /// No runner is registered under the id.
    #[error("Runner not found: {0}")]
    RunnerNotFound(String),

    /// The runner did not declare a capability the call requires.
    #[error("Runner '{runner}' lacks capability: {capability}")]
    MissingCapability { runner: String, capability: String },

    /// The runner cannot serve the requested role.
    #[error("Invalid runner: {0}")]
    InvalidRunner(String),

    /// A form operation named a key the form does not define.
    #[error("Form has no component '{0}'")]
    UnknownComponent(String),

    /// Error thrown by runner code. The message is passed through unchanged.
    #[error("{0}")]
    Extension(String),

    /// A runner returned a value of the wrong shape.
    #[error("Failed to decode result of {method}: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// Engine or runtime failure.
    #[error(transparent)]
    Runtime(RuntimeError),

    /// Persistence failure behind a store interface.
    #[error("Store error: {0}")]
    Store(String),

    /// Network failure in a host function.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<RuntimeError> for BridgeError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Script(message) => BridgeError::Extension(message),
            other => BridgeError::Runtime(other),
        }
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_errors_become_extension_errors() {
        let err: BridgeError = RuntimeError::Script("Cloudflare challenge".to_string()).into();
        assert!(matches!(err, BridgeError::Extension(_)));
        assert_eq!(err.to_string(), "Cloudflare challenge");

        let err: BridgeError = RuntimeError::MethodNotFound("getEntryForm".to_string()).into();
        assert!(matches!(err, BridgeError::Runtime(_)));
    }
}
