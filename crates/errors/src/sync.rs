//! Fan-out copy and catalog sync errors

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SyncError {
    #[error("{failed} of {total} destinations failed")]
    PartialFailure { failed: usize, total: usize },

    #[error("all {total} destinations failed")]
    AllDestinationsFailed { total: usize },

    #[error("no destinations given")]
    NoDestinations,

    #[error("failed to read source {path}: {message}")]
    SourceRead { path: String, message: String },

    #[error("write to {destination} failed: {message}")]
    DestinationWrite {
        destination: String,
        message: String,
    },

    #[error("destination {destination} could not be opened: {message}")]
    DestinationOpen {
        destination: String,
        message: String,
    },

    #[error("copy cancelled")]
    Cancelled,
}

impl UserFacingError for SyncError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::PartialFailure { .. } => {
                Some("Replace or re-seat the failed destination drives and sync them again.")
            }
            Self::AllDestinationsFailed { .. } => {
                Some("Check cabling and that the destination drives are writable.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PartialFailure { .. } | Self::DestinationWrite { .. }
        )
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::PartialFailure { .. } => "sync.partial_failure",
            Self::AllDestinationsFailed { .. } => "sync.all_failed",
            Self::NoDestinations => "sync.no_destinations",
            Self::SourceRead { .. } => "sync.source_read",
            Self::DestinationWrite { .. } => "sync.destination_write",
            Self::DestinationOpen { .. } => "sync.destination_open",
            Self::Cancelled => "sync.cancelled",
        };
        Some(code)
    }
}
