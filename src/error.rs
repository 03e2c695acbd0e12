//! TpcKv Error Types

use thiserror::Error;

/// Result type alias for TpcKv operations
pub type Result<T> = std::result::Result<T, Error>;

/// TpcKv error types
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Oversized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    // Registry errors
    #[error("Registry full: {capacity} replicas already registered")]
    RegistryFull { capacity: usize },

    #[error("No replicas registered")]
    NoReplicas,

    // Two-phase commit errors
    #[error("Commit aborted: {0}")]
    CommitAborted(String),

    /// Several replicas failed; each line is prefixed by the replica id
    #[error("{0}")]
    ReplicaErrors(String),

    /// Failure text returned by the coordinator to a client
    #[error("{0}")]
    Remote(String),

    // Commit log errors
    #[error("Commit log error: {0}")]
    CommitLog(String),

    #[error("Commit log corrupted at offset {offset}: {reason}")]
    LogCorrupted { offset: u64, reason: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for the "unparseable message" framing error
    pub fn unparseable() -> Self {
        Error::Protocol("unparseable message".into())
    }

    /// Shorthand for the "message format incorrect" validation error
    pub fn malformed() -> Self {
        Error::Protocol("message format incorrect".into())
    }

    /// Check if this error is retryable during phase-2 delivery
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(Error::Timeout("replica-1".into()).is_retryable());
        assert!(Error::ConnectionFailed {
            address: "127.0.0.1:1".into(),
            reason: "refused".into(),
        }
        .is_retryable());
        assert!(!Error::unparseable().is_retryable());
        assert!(!Error::CommitAborted("both replicas reachable".into()).is_retryable());
    }

    #[test]
    fn test_protocol_messages() {
        assert_eq!(Error::unparseable().to_string(), "Protocol error: unparseable message");
        assert_eq!(Error::malformed().to_string(), "Protocol error: message format incorrect");
        assert_eq!(Error::Oversized("Oversized key".into()).to_string(), "Oversized key");
    }
}
