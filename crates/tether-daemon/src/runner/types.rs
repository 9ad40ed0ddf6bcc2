//! Session runner types.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Lifecycle of a session runner.
///
/// `Idle → Starting → Running → {Error, Stopped}`; `Error` may go back to
/// `Starting` on retry, `Stopped` is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunnerState {
    Idle,
    Starting,
    Running,
    Error { message: String },
    Stopped,
}

impl RunnerState {
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Starting => f.write_str("starting"),
            Self::Running => f.write_str("running"),
            Self::Error { message } => write!(f, "error: {message}"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Reply to a successfully completed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnReply {
    /// Concatenated assistant fragments, or the `result` text when none arrived.
    pub text: String,
    /// Raw protocol lines recorded for the turn's session, in arrival order.
    pub captured_lines: Vec<String>,
}

/// Why a turn did not produce a [`TurnReply`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    #[error("No live subprocess (runner is {state})")]
    NotRunning { state: RunnerState },

    #[error("Request {request_id} is already pending")]
    DuplicateRequest { request_id: String },

    /// The subprocess reported `is_error: true`; the message is its `result`.
    #[error("{message}")]
    Remote {
        message: String,
        captured_lines: Vec<String>,
    },

    #[error("Failed to write turn to subprocess: {0}")]
    Io(String),

    #[error("Request {request_id} was cancelled")]
    Cancelled { request_id: String },

    #[error("Request {request_id} timed out after {after:?}")]
    Timeout { request_id: String, after: Duration },

    #[error("Runner stopped")]
    Stopped,
}

/// Identifies one registered observer within a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub(crate) u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}
