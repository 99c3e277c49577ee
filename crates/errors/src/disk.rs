//! Disk and partition model errors

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiskError {
    #[error("device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("partition {partition} not found on {device}")]
    PartitionNotFound { device: String, partition: String },

    #[error("invalid partition table on {device}: {message}")]
    InvalidTable { device: String, message: String },

    #[error("invalid restore type {id}: {message}")]
    InvalidRestoreType { id: String, message: String },
}

impl UserFacingError for DiskError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::DeviceNotFound { .. } => Some("List block devices with `lsblk` and retry."),
            Self::PartitionNotFound { .. } => {
                Some("Run `refurb read-table <device>` to see the current partitions.")
            }
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::DeviceNotFound { .. } => "disk.device_not_found",
            Self::PartitionNotFound { .. } => "disk.partition_not_found",
            Self::InvalidTable { .. } => "disk.invalid_table",
            Self::InvalidRestoreType { .. } => "disk.invalid_restore_type",
        };
        Some(code)
    }
}
