#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the refurb disk operations engine
//!
//! This crate provides the data model shared by the planner, the task runner
//! and the operation layer: disks and their partitions, filesystem and
//! partition-type codes, and the restore-type descriptor that selects how a
//! disk is re-imaged.

pub mod disk;
pub mod partition;
pub mod reports;
pub mod restore;

pub use disk::{partition_device_path, Disk, Partition, PartitionTableKind, SharedDisk};
pub use partition::{FsKind, PartitionCode, PlanKind};
pub use reports::{
    DestinationStatus, RunState, ScoreboardSnapshot, TaskSnapshot, PROGRESS_DONE, PROGRESS_FAILED,
};
pub use restore::{HostnamePolicy, KernelCmdlineEdit, RestoreType, ToolVersion};
pub use uuid::Uuid;

use serde::{Deserialize, Serialize};

/// Bytes in one mebibyte
pub const MIB: u64 = 1024 * 1024;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Plain,
    Tty,
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Tty
    }
}

/// Color output choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    Always,
    Auto,
    Never,
}

// Implement clap::ValueEnum for ColorChoice
impl clap::ValueEnum for ColorChoice {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Always, Self::Auto, Self::Never]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Always => clap::builder::PossibleValue::new("always"),
            Self::Auto => clap::builder::PossibleValue::new("auto"),
            Self::Never => clap::builder::PossibleValue::new("never"),
        })
    }
}

impl Default for ColorChoice {
    fn default() -> Self {
        Self::Auto
    }
}

/// Convert a byte count into whole mebibytes, rounding down
#[must_use]
pub fn bytes_to_mib(bytes: u64) -> u64 {
    bytes / MIB
}
