//! Partition planning errors

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlanError {
    #[error("disk too small: {disk_mib} MiB available, {required_mib} MiB required")]
    DiskTooSmall { disk_mib: u64, required_mib: u64 },

    #[error("invalid partition plan: {message}")]
    Invalid { message: String },

    #[error("unknown plan kind: {kind}")]
    UnknownKind { kind: String },
}

impl UserFacingError for PlanError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::DiskTooSmall { .. } => Some("Use a larger target disk or a smaller plan kind."),
            Self::UnknownKind { .. } => Some("Valid plan kinds are: efi, traditional, usb."),
            Self::Invalid { .. } => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::DiskTooSmall { .. } => "plan.disk_too_small",
            Self::Invalid { .. } => "plan.invalid",
            Self::UnknownKind { .. } => "plan.unknown_kind",
        };
        Some(code)
    }
}
