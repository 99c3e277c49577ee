//! Disk and partition model shared between tasks of one run

use crate::partition::FsKind;
use refurb_errors::DiskError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A disk handle shared by the tasks of a single runner.
///
/// Only the task currently operating on the disk mutates it.
pub type SharedDisk = Arc<Mutex<Disk>>;

/// Kind of partition table found on a disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PartitionTableKind {
    Gpt,
    Dos,
    #[default]
    Unknown,
}

impl PartitionTableKind {
    /// Parse the `label` field that `sfdisk --json` reports
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label {
            "gpt" => Self::Gpt,
            "dos" | "mbr" => Self::Dos,
            _ => Self::Unknown,
        }
    }
}

/// One partition of a disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// 1-based partition number
    pub number: u32,
    /// Block device node, e.g. `/dev/sda2`
    pub device: PathBuf,
    /// Start offset in bytes
    pub start: u64,
    /// Size in bytes
    pub size: u64,
    /// Partition type as reported by the partition table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_kind: Option<FsKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<PathBuf>,
}

impl Partition {
    /// Create a partition with only the table geometry known
    #[must_use]
    pub fn new(number: u32, device: impl Into<PathBuf>, start: u64, size: u64) -> Self {
        Self {
            number,
            device: device.into(),
            start,
            size,
            type_code: None,
            fs_kind: None,
            uuid: None,
            part_uuid: None,
            label: None,
            mountpoint: None,
        }
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mountpoint.is_some()
    }
}

/// A whole block device and its current partition list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Block device node, e.g. `/dev/sda`
    pub device: PathBuf,
    /// Size in bytes
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(default)]
    pub table: PartitionTableKind,
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

impl Disk {
    /// Create a disk with no known partitions
    #[must_use]
    pub fn new(device: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            device: device.into(),
            size,
            model: None,
            serial: None,
            table: PartitionTableKind::Unknown,
            partitions: Vec::new(),
        }
    }

    /// Wrap this disk for sharing between tasks
    #[must_use]
    pub fn into_shared(self) -> SharedDisk {
        Arc::new(Mutex::new(self))
    }

    /// Human identifier (the device path)
    #[must_use]
    pub fn id(&self) -> String {
        self.device.display().to_string()
    }

    /// Device node of partition `number` on this disk.
    ///
    /// Devices whose name ends in a digit (`nvme0n1`, `mmcblk0`, `loop0`) get
    /// a `p` separator.
    #[must_use]
    pub fn partition_device(&self, number: u32) -> PathBuf {
        partition_device_path(&self.device, number)
    }

    /// Find a partition by number, device path, filesystem UUID or label
    #[must_use]
    pub fn find_partition(&self, id: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| partition_matches(p, id))
    }

    /// Mutable variant of [`Disk::find_partition`]
    pub fn find_partition_mut(&mut self, id: &str) -> Option<&mut Partition> {
        self.partitions.iter_mut().find(|p| partition_matches(p, id))
    }

    /// Like [`Disk::find_partition`] but reports a missing partition as an error
    ///
    /// # Errors
    ///
    /// Returns `DiskError::PartitionNotFound` when no partition matches `id`.
    pub fn require_partition(&self, id: &str) -> Result<&Partition, DiskError> {
        self.find_partition(id)
            .ok_or_else(|| DiskError::PartitionNotFound {
                device: self.id(),
                partition: id.to_string(),
            })
    }

    /// Replace the partition list, keeping it ordered by number
    pub fn set_partitions(&mut self, mut partitions: Vec<Partition>) {
        partitions.sort_by_key(|p| p.number);
        self.partitions = partitions;
    }
}

fn partition_matches(partition: &Partition, id: &str) -> bool {
    if let Ok(number) = id.parse::<u32>() {
        return partition.number == number;
    }
    partition.device == Path::new(id)
        || partition.uuid.as_deref() == Some(id)
        || partition.part_uuid.as_deref() == Some(id)
        || partition.label.as_deref() == Some(id)
}

/// Device node of partition `number` on `disk`
#[must_use]
pub fn partition_device_path(disk: &Path, number: u32) -> PathBuf {
    let base = disk.display().to_string();
    if base.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{base}p{number}"))
    } else {
        PathBuf::from(format!("{base}{number}"))
    }
}
