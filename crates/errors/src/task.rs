//! Task execution error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

/// Failures raised while a single pipeline task is set up, polled or torn down
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TaskError {
    /// A precondition or resource was missing before any process could start
    #[error("setup failed for {task}: {message}")]
    SetupFailed { task: String, message: String },

    /// The child process exited with a status outside the accepted set
    #[error("{command} exited with status {status}")]
    ProcessFailed {
        command: String,
        status: i32,
        stdout: String,
        stderr: String,
    },

    /// The child process was terminated by a signal
    #[error("{command} killed by signal {signal}")]
    Signalled { command: String, signal: i32 },

    /// No independent progress signal and the elapsed time ran past the estimate
    #[error("{task} timed out after {elapsed_secs:.0}s (estimate {estimate_secs:.0}s)")]
    TimedOut {
        task: String,
        elapsed_secs: f64,
        estimate_secs: f64,
    },

    /// Cancellation requested by the operator
    #[error("{task} cancelled")]
    Cancelled { task: String },

    /// Tool output could not be understood
    #[error("could not parse {tool} output: {message}")]
    Parse { tool: String, message: String },

    /// A task asked for its time estimate before one was available
    #[error("no time estimate available for {task}")]
    NoEstimate { task: String },

    /// Generic failure raised by an in-process callback
    #[error("{task} failed: {message}")]
    Failed { task: String, message: String },
}

impl TaskError {
    /// Build a setup failure for the named task
    pub fn setup(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SetupFailed {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Build a generic failure for the named task
    pub fn failed(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            task: task.into(),
            message: message.into(),
        }
    }
}

impl UserFacingError for TaskError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::SetupFailed { .. } => {
                Some("Check that the target device exists and required tools are installed.")
            }
            Self::ProcessFailed { .. } | Self::Signalled { .. } => {
                Some("Inspect the captured tool output in the task verdict.")
            }
            Self::TimedOut { .. } => Some("The drive may be failing; run a wipe or SMART check."),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::Cancelled { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::SetupFailed { .. } => "task.setup_failed",
            Self::ProcessFailed { .. } => "task.process_failed",
            Self::Signalled { .. } => "task.signalled",
            Self::TimedOut { .. } => "task.timed_out",
            Self::Cancelled { .. } => "task.cancelled",
            Self::Parse { .. } => "task.parse",
            Self::NoEstimate { .. } => "task.no_estimate",
            Self::Failed { .. } => "task.failed",
        };
        Some(code)
    }
}
