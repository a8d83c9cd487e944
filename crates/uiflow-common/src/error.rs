use crate::protocol::Operation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failures of the transport itself, as opposed to the remote tool
/// reporting that an action failed.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Bridge unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Bridge call {operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: Operation,
        timeout_ms: u64,
    },

    #[error("Bridge returned HTTP {status} for {operation}: {body}")]
    Status {
        operation: Operation,
        status: u16,
        body: String,
    },

    #[error("Malformed bridge response for {operation}: {reason}")]
    Malformed {
        operation: Operation,
        reason: String,
    },
}

/// Step-level error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bridge unreachable or answered with garbage.
    Transport,
    /// The remote primitive reported failure.
    ActionFailed,
    /// The primitive claimed success but the page disagrees.
    VerificationFailed,
    /// Selector matched zero or several elements.
    AmbiguousTarget,
    /// The session stopped answering; the rest of the run is abandoned.
    SessionDead,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport error",
            ErrorKind::ActionFailed => "action failed",
            ErrorKind::VerificationFailed => "verification failed",
            ErrorKind::AmbiguousTarget => "ambiguous target",
            ErrorKind::SessionDead => "session dead",
        };
        f.write_str(s)
    }
}

/// Error attached to a step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    pub fn is_transport(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport | ErrorKind::SessionDead)
    }
}

impl From<&TransportError> for ErrorRecord {
    fn from(err: &TransportError) -> Self {
        ErrorRecord::new(ErrorKind::Transport, err.to_string())
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}
