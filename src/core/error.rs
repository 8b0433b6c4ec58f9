use std::io;
use thiserror::Error;

/// Errors that escape the gate.
///
/// Only malformed input, configuration problems and audit-sink failures are
/// surfaced here. Faults inside the approval and execution boundary are
/// absorbed into [`DecisionError`] / [`ExecutionError`] and turned into typed
/// results instead.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),
    #[error("Audit write failed: {0}")]
    AuditWrite(String),
    #[error("Audit integrity violation: {0}")]
    AuditIntegrity(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// The decision callback faulted. Always converted into a deny.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecisionError {
    #[error("decision channel unavailable: {0}")]
    Unavailable(String),
    #[error("decision timed out after {0} ms")]
    Timeout(u64),
    #[error("decision callback panicked: {0}")]
    Panicked(String),
}

/// The executor faulted. Always converted into a `FAILURE` result.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("{0}")]
    Target(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("executor panicked: {0}")]
    Panicked(String),
}

impl From<String> for ExecutionError {
    fn from(msg: String) -> Self {
        ExecutionError::Target(msg)
    }
}

impl From<&str> for ExecutionError {
    fn from(msg: &str) -> Self {
        ExecutionError::Target(msg.to_string())
    }
}

/// Best-effort text for a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
