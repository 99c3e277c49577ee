//! Plan entries and sfdisk script rendering

use refurb_types::{FsKind, PartitionCode, PlanKind};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One partition of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// 1-based partition number
    pub number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Filesystem to create, `None` for unformatted entries like the BIOS boot stub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsKind>,
    /// Start offset in MiB
    pub start: u64,
    /// Size in MiB; 0 before resolution means "take what is left"
    pub size: u64,
    pub code: PartitionCode,
    /// Extra sfdisk attributes, e.g. `bootable`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mkfs_options: Vec<String>,
}

impl PlanEntry {
    /// A fixed-size entry
    #[must_use]
    pub fn fixed(number: u32, code: PartitionCode, fs: Option<FsKind>, size: u64) -> Self {
        Self {
            number,
            name: None,
            fs,
            start: 0,
            size,
            code,
            flags: None,
            mkfs_options: Vec::new(),
        }
    }

    /// The entry that absorbs the remaining space
    #[must_use]
    pub fn flexible(number: u32, code: PartitionCode, fs: Option<FsKind>) -> Self {
        Self::fixed(number, code, fs, 0)
    }

    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: &str) -> Self {
        self.flags = Some(flags.to_string());
        self
    }

    #[must_use]
    pub fn is_flexible(&self) -> bool {
        self.size == 0
    }

    /// First MiB past the end of this entry
    #[must_use]
    pub fn end(&self) -> u64 {
        self.start + self.size
    }
}

/// A resolved partition table for one disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub kind: PlanKind,
    /// Disk size in MiB the plan was resolved against
    pub disk_mib: u64,
    pub entries: Vec<PlanEntry>,
}

impl PartitionPlan {
    #[must_use]
    pub fn entry(&self, number: u32) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.number == number)
    }

    fn by_code(&self, code: PartitionCode) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.code == code)
    }

    /// The root filesystem entry
    #[must_use]
    pub fn root(&self) -> Option<&PlanEntry> {
        self.entries
            .iter()
            .find(|e| matches!(e.code, PartitionCode::Ext4 | PartitionCode::Mbr))
    }

    #[must_use]
    pub fn swap(&self) -> Option<&PlanEntry> {
        self.by_code(PartitionCode::Swap)
    }

    /// The EFI System Partition
    #[must_use]
    pub fn esp(&self) -> Option<&PlanEntry> {
        self.by_code(PartitionCode::Uefi)
    }

    /// End of the last entry in MiB
    #[must_use]
    pub fn end_mib(&self) -> u64 {
        self.entries.iter().map(PlanEntry::end).max().unwrap_or(0)
    }

    /// Render the plan as input for `sfdisk`
    #[must_use]
    pub fn to_sfdisk_script(&self) -> String {
        let gpt = self.kind.is_gpt();
        let mut script = String::new();
        let _ = writeln!(script, "label: {}", if gpt { "gpt" } else { "dos" });
        script.push('\n');
        for entry in &self.entries {
            let _ = write!(
                script,
                "start={}MiB, size={}MiB, type={}",
                entry.start,
                entry.size,
                entry.code.sfdisk_type(gpt)
            );
            if gpt {
                if let Some(name) = &entry.name {
                    let _ = write!(script, ", name=\"{name}\"");
                }
            }
            if let Some(flags) = &entry.flags {
                let _ = write!(script, ", {flags}");
            }
            script.push('\n');
        }
        script
    }
}
