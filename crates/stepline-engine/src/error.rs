//! Error types for the pipeline engine.
//!
//! Two layers live here:
//! - [`EngineError`] is returned to callers of the engine API (loading,
//!   registering, starting executions). These never become a running execution.
//! - [`Failure`] is the runtime value produced by the resolver or a connector
//!   while an execution is in flight. Failures are offered to the current
//!   state's catch clauses before they can terminate the execution.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced to callers of the engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A pipeline definition failed structural or referential validation.
    #[error("Invalid pipeline definition: {0}")]
    DefinitionInvalid(String),

    /// No pipeline registered under this name.
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    /// No execution with this id is running or stored.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// The pipeline already has a running execution.
    #[error("Pipeline '{pipeline}' already has a running execution ({running})")]
    ConcurrentRunRejected { pipeline: String, running: String },

    /// An execution was asked to run after it already left `NotStarted`.
    #[error("Execution {0} has already been started")]
    AlreadyStarted(String),

    /// The engine is shutting down and accepts no new executions.
    #[error("Engine is shutting down")]
    ShuttingDown,

    /// Caller-supplied input was rejected.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Failed to read a definition file.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Closed set of failure kinds an execution can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    DefinitionInvalid,
    PathNotFound,
    ResolutionDepthExceeded,
    ConnectorFailure,
    ConcurrentRunRejected,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::DefinitionInvalid,
        ErrorKind::PathNotFound,
        ErrorKind::ResolutionDepthExceeded,
        ErrorKind::ConnectorFailure,
        ErrorKind::ConcurrentRunRejected,
        ErrorKind::Timeout,
        ErrorKind::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DefinitionInvalid => "DefinitionInvalid",
            ErrorKind::PathNotFound => "PathNotFound",
            ErrorKind::ResolutionDepthExceeded => "ResolutionDepthExceeded",
            ErrorKind::ConnectorFailure => "ConnectorFailure",
            ErrorKind::ConcurrentRunRejected => "ConcurrentRunRejected",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ErrorKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown error kind '{}'", s))
    }
}

/// A runtime failure raised by the resolver or a connector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn path_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PathNotFound, message)
    }

    pub fn connector(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectorFailure, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn concurrent_run(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConcurrentRunRejected, message)
    }

    /// The payload merged into the context when a catch clause handles this failure.
    pub fn to_payload(&self) -> Value {
        json!({
            "error": self.kind.as_str(),
            "cause": self.message,
        })
    }
}

/// Terminal error recorded on a failed execution.
///
/// `error` is either an [`ErrorKind`] name (unmatched failure, cancellation)
/// or the fixed code of the `Fail` state that ended the run. `kind` is the
/// runtime failure behind it: the failure itself when it went unmatched, or
/// the last caught failure when a catch clause routed into the `Fail` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalError {
    pub error: String,
    pub cause: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl TerminalError {
    pub fn new(error: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            cause: cause.into(),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: Option<ErrorKind>) -> Self {
        self.kind = kind;
        self
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }
}

impl From<&Failure> for TerminalError {
    fn from(failure: &Failure) -> Self {
        Self::new(failure.kind.as_str(), failure.message.clone()).with_kind(Some(failure.kind))
    }
}

impl fmt::Display for TerminalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_parse_roundtrip() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
        assert!("NotAKind".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_failure_payload_shape() {
        let f = Failure::connector("job exploded");
        assert_eq!(
            f.to_payload(),
            json!({"error": "ConnectorFailure", "cause": "job exploded"})
        );
        assert_eq!(f.to_string(), "ConnectorFailure: job exploded");
    }

    #[test]
    fn test_terminal_error_kind() {
        let t = TerminalError::from(&Failure::timeout("too slow"));
        assert_eq!(t.kind(), Some(ErrorKind::Timeout));
        let custom = TerminalError::new("TrainingFailed", "model did not converge");
        assert_eq!(custom.kind(), None);
        let caught = custom.with_kind(Some(ErrorKind::ConnectorFailure));
        assert_eq!(caught.error, "TrainingFailed");
        assert_eq!(caught.kind(), Some(ErrorKind::ConnectorFailure));
    }
}
