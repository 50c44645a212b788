//! Error types for elined.
//!
//! Each collaborator boundary has its own error type; [`EvcError`] aggregates
//! them for the public circuit operations.

use std::io;
use thiserror::Error;

/// Result type alias for circuit operations.
pub type Result<T> = std::result::Result<T, EvcError>;

/// A path whose link chain violates continuity, liveness or termination.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvalidPath(pub String);

impl InvalidPath {
    /// Creates an invalid path error.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// VLAN pool errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    /// The pool of the target has no free VLAN left.
    #[error("No available VLAN on {0}")]
    NoTagAvailable(String),

    /// The requested tag is already in use on the target.
    #[error("Tag {tag} is not available on {target}")]
    Conflict {
        /// Interface or link the tag was requested on.
        target: String,
        /// The conflicting tag.
        tag: String,
    },

    /// The target interface or link is unknown to the topology.
    #[error("Unknown tag target: {0}")]
    UnknownTarget(String),
}

/// Direction of a flow-service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowCommand {
    /// Install (`flows`).
    Install,
    /// Delete (`delete`).
    Delete,
}

impl std::fmt::Display for FlowCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowCommand::Install => f.write_str("flows"),
            FlowCommand::Delete => f.write_str("delete"),
        }
    }
}

/// Southbound flow install/delete failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowModError {
    /// The flow service answered with a non-success status.
    #[error("Flow service rejected '{command}' request (status {status}): {body}")]
    Rejected {
        /// Command that failed.
        command: FlowCommand,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The request never reached the flow service.
    #[error("Flow service request '{command}' failed: {message}")]
    Transport {
        /// Command that failed.
        command: FlowCommand,
        /// Error message.
        message: String,
    },
}

/// HTTP collaborator failures (path computation, trace, topology).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure.
    #[error("{service} request failed: {source}")]
    Http {
        /// Service name.
        service: &'static str,
        /// Underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The request exceeded its deadline.
    #[error("{service} request timed out")]
    Timeout {
        /// Service name.
        service: &'static str,
    },

    /// The service answered with an unexpected status.
    #[error("{service} returned status {status}: {body}")]
    Status {
        /// Service name.
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

impl ClientError {
    /// Maps a reqwest error, separating timeouts from other failures.
    pub fn from_reqwest(service: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            ClientError::Timeout { service }
        } else {
            ClientError::Http { service, source }
        }
    }
}

/// Circuit store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not connect to the backing database.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// A command failed after all retry attempts.
    #[error("Store operation '{operation}' failed after {attempts} attempts: {message}")]
    Command {
        /// Operation name.
        operation: &'static str,
        /// Number of attempts made.
        attempts: u32,
        /// Last error message.
        message: String,
    },

    /// A stored document could not be (de)serialized.
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by circuit operations.
#[derive(Debug, Error)]
pub enum EvcError {
    /// Request-level validation failure; nothing was mutated.
    #[error("{0}")]
    Validation(String),

    /// Path topology violation.
    #[error("Invalid path: {0}")]
    InvalidPath(#[from] InvalidPath),

    /// VLAN reservation failure.
    #[error(transparent)]
    Tag(#[from] TagError),

    /// Flow service failure.
    #[error(transparent)]
    FlowMod(#[from] FlowModError),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// HTTP collaborator failure.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Circuit not found.
    #[error("Circuit {0} not found")]
    NotFound(String),

    /// Request conflicts with the circuit state.
    #[error("{0}")]
    Conflict(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl EvcError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Returns true if the error was caused by the request itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EvcError::Validation(_)
                | EvcError::InvalidPath(_)
                | EvcError::Tag(_)
                | EvcError::NotFound(_)
                | EvcError::Conflict(_)
        )
    }
}
