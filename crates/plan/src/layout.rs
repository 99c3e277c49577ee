//! Layouts per plan kind and the resolution algorithm

use refurb_errors::PlanError;
use refurb_types::{bytes_to_mib, FsKind, PartitionCode, PlanKind, RestoreType, ToolVersion};

use crate::entry::{PartitionPlan, PlanEntry};
use crate::mkfs::legacy_ext4_features;

/// Space in front of the first partition, reserved for the partition table
pub const TABLE_OFFSET_MIB: u64 = 1;
/// Kept free at the end of the disk (GPT backup header, alignment slop)
pub const SAFETY_MARGIN_MIB: u64 = 1;
/// Smallest size the flexible entry may resolve to
pub const MIN_FLEXIBLE_MIB: u64 = 16;

pub const BIOS_BOOT_MIB: u64 = 1;
pub const ESP_MIB: u64 = 512;
/// ESP on installer sticks only holds the loader
pub const USB_ESP_MIB: u64 = 64;

pub const SWAP_MIN_MIB: u64 = 2048;
pub const SWAP_MAX_MIB: u64 = 8192;

/// Knobs that vary a layout within its kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    /// Include swap (ignored for USB sticks, which never get one)
    pub swap: bool,
    /// Include an ESP on USB sticks
    pub efi: bool,
    pub root_fs: FsKind,
    /// mkfs tooling version of the OS that will mount the root filesystem
    pub mkfs_version: Option<ToolVersion>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            swap: true,
            efi: true,
            root_fs: FsKind::Ext4,
            mkfs_version: None,
        }
    }
}

impl PlanOptions {
    /// Options matching what a restore type expects of its disk
    #[must_use]
    pub fn from_restore_type(restore: &RestoreType) -> Self {
        Self {
            swap: restore.swap,
            efi: restore.efi_image,
            root_fs: restore.root_fs.clone(),
            mkfs_version: restore.mkfs_version,
        }
    }
}

/// Swap size for a disk: 5% of the disk, clamped to 2..8 GiB
#[must_use]
pub fn swap_size_mib(disk_mib: u64) -> u64 {
    let five_percent = (disk_mib.saturating_mul(5) + 50) / 100;
    five_percent.clamp(SWAP_MIN_MIB, SWAP_MAX_MIB)
}

/// Build and resolve the plan for a disk of `disk_bytes` bytes
///
/// # Errors
///
/// Returns `PlanError::DiskTooSmall` when the fixed entries do not leave room
/// for the flexible one.
pub fn make_plan(
    disk_bytes: u64,
    kind: PlanKind,
    options: &PlanOptions,
) -> Result<PartitionPlan, PlanError> {
    let disk_mib = bytes_to_mib(disk_bytes);
    let swap = swap_size_mib(disk_mib);

    let mut root = PlanEntry::flexible(0, root_code(kind), Some(options.root_fs.clone()))
        .named("root");
    if matches!(options.root_fs, FsKind::Ext2 | FsKind::Ext3 | FsKind::Ext4) {
        root.mkfs_options = legacy_ext4_features(options.mkfs_version);
    }

    let mut entries = Vec::new();
    match kind {
        PlanKind::Efi => {
            entries.push(
                PlanEntry::fixed(0, PartitionCode::BiosBoot, None, BIOS_BOOT_MIB).named("bios"),
            );
            entries.push(
                PlanEntry::fixed(0, PartitionCode::Uefi, Some(FsKind::Vfat), ESP_MIB).named("EFI"),
            );
            if options.swap {
                entries.push(
                    PlanEntry::fixed(0, PartitionCode::Swap, Some(FsKind::Swap), swap)
                        .named("swap"),
                );
            }
            entries.push(root);
        }
        PlanKind::Traditional => {
            entries.push(root.with_flags("bootable"));
            if options.swap {
                entries.push(
                    PlanEntry::fixed(0, PartitionCode::Swap, Some(FsKind::Swap), swap)
                        .named("swap"),
                );
            }
        }
        PlanKind::UsbStick => {
            if options.efi {
                entries.push(
                    PlanEntry::fixed(0, PartitionCode::Uefi, Some(FsKind::Vfat), USB_ESP_MIB)
                        .named("EFI"),
                );
            }
            entries.push(root);
        }
    }
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.number = u32::try_from(i + 1).unwrap_or(u32::MAX);
    }

    let entries = resolve(entries, disk_mib)?;
    tracing::debug!(%kind, disk_mib, swap, "resolved partition plan");
    Ok(PartitionPlan {
        kind,
        disk_mib,
        entries,
    })
}

fn root_code(kind: PlanKind) -> PartitionCode {
    if kind.is_gpt() {
        PartitionCode::Ext4
    } else {
        PartitionCode::Mbr
    }
}

/// Give the single flexible entry the space left after the fixed entries,
/// the table offset and the safety margin, then lay entries out back to back.
///
/// # Errors
///
/// Returns `PlanError::Invalid` unless exactly one entry is flexible, and
/// `PlanError::DiskTooSmall` when the flexible entry would end up smaller
/// than [`MIN_FLEXIBLE_MIB`].
pub fn resolve(mut entries: Vec<PlanEntry>, disk_mib: u64) -> Result<Vec<PlanEntry>, PlanError> {
    let flexible = entries.iter().filter(|e| e.is_flexible()).count();
    if flexible != 1 {
        return Err(PlanError::Invalid {
            message: format!("expected exactly one flexible entry, found {flexible}"),
        });
    }

    let fixed: u64 = entries.iter().map(|e| e.size).sum();
    let reserved = TABLE_OFFSET_MIB + fixed + SAFETY_MARGIN_MIB;
    let required = reserved + MIN_FLEXIBLE_MIB;
    if disk_mib < required {
        return Err(PlanError::DiskTooSmall {
            disk_mib,
            required_mib: required,
        });
    }
    let remaining = disk_mib - reserved;

    let mut start = TABLE_OFFSET_MIB;
    for entry in &mut entries {
        if entry.is_flexible() {
            entry.size = remaining;
        }
        entry.start = start;
        start += entry.size;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn swap_clamps() {
        assert_eq!(swap_size_mib(1024), 2048);
        assert_eq!(swap_size_mib(4 * 1024 * 1024), 8192);
        assert_eq!(swap_size_mib(100 * 1024), 5120);
    }

    #[test]
    fn efi_layout() {
        let plan = make_plan(500 * GIB, PlanKind::Efi, &PlanOptions::default()).unwrap();
        let codes: Vec<_> = plan.entries.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![
                PartitionCode::BiosBoot,
                PartitionCode::Uefi,
                PartitionCode::Swap,
                PartitionCode::Ext4
            ]
        );
        assert_eq!(plan.entries[0].start, TABLE_OFFSET_MIB);
        assert_eq!(plan.swap().unwrap().size, 8192);
        assert_eq!(plan.end_mib(), 500 * 1024 - SAFETY_MARGIN_MIB);
    }

    #[test]
    fn traditional_root_comes_first_and_boots() {
        let plan = make_plan(100 * GIB, PlanKind::Traditional, &PlanOptions::default()).unwrap();
        let root = plan.root().unwrap();
        assert_eq!(root.number, 1);
        assert_eq!(root.flags.as_deref(), Some("bootable"));
        assert_eq!(root.size, 100 * 1024 - 1 - 5120 - 1);
        assert_eq!(plan.swap().unwrap().start, root.end());
        assert!(plan.esp().is_none());
    }

    #[test]
    fn usb_never_has_swap() {
        let options = PlanOptions {
            efi: false,
            ..PlanOptions::default()
        };
        let plan = make_plan(8 * GIB, PlanKind::UsbStick, &options).unwrap();
        assert_eq!(plan.entries.len(), 1);
        assert!(plan.swap().is_none());

        let plan = make_plan(8 * GIB, PlanKind::UsbStick, &PlanOptions::default()).unwrap();
        assert_eq!(plan.esp().unwrap().size, USB_ESP_MIB);
        assert!(plan.swap().is_none());
    }

    #[test]
    fn tiny_disk_is_rejected() {
        let err = make_plan(GIB, PlanKind::Efi, &PlanOptions::default()).unwrap_err();
        assert!(matches!(err, PlanError::DiskTooSmall { disk_mib: 1024, .. }));
    }

    #[test]
    fn resolve_requires_one_flexible_entry() {
        let entries = vec![
            PlanEntry::flexible(1, PartitionCode::Ext4, None),
            PlanEntry::flexible(2, PartitionCode::Ext4, None),
        ];
        assert!(matches!(
            resolve(entries, 10_000),
            Err(PlanError::Invalid { .. })
        ));
        assert!(resolve(Vec::new(), 10_000).is_err());
    }
}
