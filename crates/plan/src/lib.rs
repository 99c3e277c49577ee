#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Partition planning for refurb
//!
//! Turns a disk size and a [`PlanKind`] into an ordered, resolved partition
//! table. Everything here is pure: rendering the plan as an `sfdisk` script
//! and building filesystem-maker commands does not touch the disk.
//!
//! All offsets and sizes are in MiB.

mod entry;
mod layout;
mod mkfs;

pub use entry::{PartitionPlan, PlanEntry};
pub use layout::{
    make_plan, resolve, swap_size_mib, PlanOptions, BIOS_BOOT_MIB, ESP_MIB, MIN_FLEXIBLE_MIB,
    SAFETY_MARGIN_MIB, SWAP_MAX_MIB, SWAP_MIN_MIB, TABLE_OFFSET_MIB,
};
pub use mkfs::{legacy_ext4_features, mkfs_command};

pub use refurb_types::{PartitionCode, PlanKind};
