//! Operation orchestration error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpsError {
    #[error("operation failed: {message}")]
    OperationFailed { message: String },

    #[error("invalid operation: {operation}")]
    InvalidOperation { operation: String },

    #[error("image not found: {path}")]
    ImageNotFound { path: String },

    #[error("restore type {id} requires {what}")]
    RestoreTypeMismatch { id: String, what: String },

    #[error("invalid wipe mode: {mode}")]
    InvalidWipeMode { mode: String },

    #[error("serialization error: {message}")]
    SerializationError { message: String },

    #[error("event channel closed")]
    EventChannelClosed,
}

impl UserFacingError for OpsError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::ImageNotFound { .. } => Some("Check the image path or sync the catalog first."),
            Self::InvalidWipeMode { .. } => Some("Valid wipe modes are: quick, zero, discard."),
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::OperationFailed { .. } => "ops.operation_failed",
            Self::InvalidOperation { .. } => "ops.invalid_operation",
            Self::ImageNotFound { .. } => "ops.image_not_found",
            Self::RestoreTypeMismatch { .. } => "ops.restore_type_mismatch",
            Self::InvalidWipeMode { .. } => "ops.invalid_wipe_mode",
            Self::SerializationError { .. } => "ops.serialization",
            Self::EventChannelClosed => "ops.event_channel_closed",
        };
        Some(code)
    }
}
