//! Filesystem kinds, partition type codes and plan kinds

use refurb_errors::PlanError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Filesystem found on (or to be created on) a partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FsKind {
    Ext2,
    Ext3,
    Ext4,
    Vfat,
    Ntfs,
    Xfs,
    Btrfs,
    Swap,
    /// Anything blkid reports that we do not handle natively
    Other(String),
}

impl FsKind {
    /// Name of the partclone binary suffix that images this filesystem
    #[must_use]
    pub fn partclone_suffix(&self) -> &str {
        match self {
            Self::Ext2 | Self::Ext3 | Self::Ext4 => "extfs",
            Self::Vfat => "vfat",
            Self::Ntfs => "ntfs",
            Self::Xfs => "xfs",
            Self::Btrfs => "btrfs",
            Self::Swap | Self::Other(_) => "dd",
        }
    }

    /// Whether a filesystem check is meaningful for this kind
    #[must_use]
    pub fn is_checkable(&self) -> bool {
        matches!(self, Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Vfat)
    }

    /// The canonical lowercase name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Vfat => "vfat",
            Self::Ntfs => "ntfs",
            Self::Xfs => "xfs",
            Self::Btrfs => "btrfs",
            Self::Swap => "swap",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for FsKind {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "ext2" => Self::Ext2,
            "ext3" => Self::Ext3,
            "ext4" => Self::Ext4,
            "vfat" | "fat32" | "fat16" | "fat" => Self::Vfat,
            "ntfs" => Self::Ntfs,
            "xfs" => Self::Xfs,
            "btrfs" => Self::Btrfs,
            "swap" | "linux-swap" => Self::Swap,
            _ => Self::Other(value),
        }
    }
}

impl From<FsKind> for String {
    fn from(value: FsKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition type code written into the partition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionCode {
    /// Plain Linux data partition in an MBR table
    Mbr,
    /// GRUB BIOS boot stub on a GPT disk
    BiosBoot,
    /// EFI System Partition
    Uefi,
    Swap,
    /// Linux filesystem data on a GPT disk
    Ext4,
}

impl PartitionCode {
    /// Type identifier understood by `sfdisk` for the given label
    #[must_use]
    pub fn sfdisk_type(self, gpt: bool) -> &'static str {
        if gpt {
            match self {
                Self::BiosBoot => "21686148-6449-6E6F-744E-656564454649",
                Self::Uefi => "C12A7328-F81F-11D2-BA4B-00A0C93EC93B",
                Self::Swap => "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F",
                Self::Mbr | Self::Ext4 => "0FC63DAF-8483-4772-8E79-3D69D8477DE4",
            }
        } else {
            match self {
                Self::Uefi => "ef",
                Self::Swap => "82",
                Self::BiosBoot | Self::Mbr | Self::Ext4 => "83",
            }
        }
    }
}

/// Which partition layout a disk receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    /// GPT with BIOS boot stub, ESP, swap and root
    Efi,
    /// MBR with root and swap
    Traditional,
    /// Installer media: optional small ESP and a root, never swap
    #[value(name = "usb")]
    #[serde(alias = "usb")]
    UsbStick,
}

impl PlanKind {
    /// Whether this layout uses a GPT label
    #[must_use]
    pub fn is_gpt(self) -> bool {
        matches!(self, Self::Efi | Self::UsbStick)
    }
}

impl FromStr for PlanKind {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "efi" => Ok(Self::Efi),
            "traditional" | "mbr" => Ok(Self::Traditional),
            "usb" | "usb_stick" => Ok(Self::UsbStick),
            _ => Err(PlanError::UnknownKind {
                kind: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Efi => write!(f, "efi"),
            Self::Traditional => write!(f, "traditional"),
            Self::UsbStick => write!(f, "usb"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_kind_from_blkid_names() {
        assert_eq!(FsKind::from("ext4".to_string()), FsKind::Ext4);
        assert_eq!(FsKind::from("VFAT".to_string()), FsKind::Vfat);
        assert_eq!(
            FsKind::from("zfs_member".to_string()),
            FsKind::Other("zfs_member".to_string())
        );
    }

    #[test]
    fn plan_kind_parses_aliases() {
        assert_eq!("mbr".parse::<PlanKind>().unwrap(), PlanKind::Traditional);
        assert_eq!("usb".parse::<PlanKind>().unwrap(), PlanKind::UsbStick);
        assert!("floppy".parse::<PlanKind>().is_err());
    }

    #[test]
    fn sfdisk_types_depend_on_label() {
        assert_eq!(PartitionCode::Swap.sfdisk_type(false), "82");
        assert_eq!(
            PartitionCode::Uefi.sfdisk_type(true),
            "C12A7328-F81F-11D2-BA4B-00A0C93EC93B"
        );
    }
}
