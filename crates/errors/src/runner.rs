//! Runner state machine errors

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RunnerError {
    #[error("invalid runner transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("task {task} has no time estimate")]
    MissingEstimate { task: String },

    #[error("run failed: {failed} of {total} tasks failed")]
    RunFailed { failed: usize, total: usize },
}

impl UserFacingError for RunnerError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::InvalidTransition { .. } => "runner.invalid_transition",
            Self::MissingEstimate { .. } => "runner.missing_estimate",
            Self::RunFailed { .. } => "runner.run_failed",
        };
        Some(code)
    }
}
