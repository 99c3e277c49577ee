//! Platform-specific operation errors

use std::borrow::Cow;

use crate::{TaskError, UserFacingError};
use thiserror::Error;

/// Errors that can occur while spawning or signalling external processes
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlatformError {
    #[error("process execution failed: {command} - {message}")]
    ProcessExecutionFailed { command: String, message: String },

    #[error("process spawn failed: {command} - {message}")]
    SpawnFailed { command: String, message: String },

    #[error("failed to deliver {signal} to pid {pid}: {message}")]
    SignalFailed {
        pid: i32,
        signal: String,
        message: String,
    },

    #[error("command not found: {command}")]
    CommandNotFound { command: String },

    #[error("filesystem operation failed: {operation} - {message}")]
    FilesystemOperationFailed { operation: String, message: String },

    #[error("permission denied: {operation} - {message}")]
    PermissionDenied { operation: String, message: String },
}

impl From<PlatformError> for TaskError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::SpawnFailed { command, message }
            | PlatformError::ProcessExecutionFailed { command, message } => {
                TaskError::SetupFailed {
                    task: command,
                    message,
                }
            }
            PlatformError::CommandNotFound { command } => TaskError::SetupFailed {
                message: format!("command not found: {command}"),
                task: command,
            },
            _ => TaskError::Failed {
                task: "platform".to_string(),
                message: err.to_string(),
            },
        }
    }
}

impl UserFacingError for PlatformError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::CommandNotFound { .. } => {
                Some("Install the missing tool or set its path in the [tools] config section.")
            }
            Self::PermissionDenied { .. } => Some("Disk operations must run as root."),
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::ProcessExecutionFailed { .. } => "platform.process_failed",
            Self::SpawnFailed { .. } => "platform.spawn_failed",
            Self::SignalFailed { .. } => "platform.signal_failed",
            Self::CommandNotFound { .. } => "platform.command_not_found",
            Self::FilesystemOperationFailed { .. } => "platform.filesystem_failed",
            Self::PermissionDenied { .. } => "platform.permission_denied",
        };
        Some(code)
    }
}
