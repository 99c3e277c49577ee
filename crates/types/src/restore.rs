//! Restore-type descriptor consumed by the restore runner

use crate::partition::{FsKind, PlanKind};
use refurb_errors::DiskError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Version of a filesystem tool such as `mke2fs`, compared numerically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl PartialOrd for ToolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ToolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl FromStr for ToolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> Result<u32, String> {
            match parts.next() {
                Some(p) => p
                    .parse::<u32>()
                    .map_err(|_| format!("invalid version component '{p}' in '{s}'")),
                None if required => Err(format!("invalid version '{s}'")),
                None => Ok(0),
            }
        };
        let major = next(true)?;
        let minor = next(false)?;
        let patch = next(false)?;
        Ok(Self::new(major, minor, patch))
    }
}

impl TryFrom<String> for ToolVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ToolVersion> for String {
    fn from(value: ToolVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// How the restored system's hostname is chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "policy", content = "value")]
pub enum HostnamePolicy {
    /// Leave whatever the image carries
    #[default]
    Keep,
    /// Use a fixed name
    Fixed(String),
    /// Prefix followed by the last digits of the disk serial
    SerialSuffix(String),
}

/// One edit applied to the kernel command line of the restored system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op", content = "arg")]
pub enum KernelCmdlineEdit {
    Add(String),
    Remove(String),
}

/// Record describing how a disk image is laid down on a target disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreType {
    pub id: String,
    pub plan_kind: PlanKind,
    /// Version of the mkfs tooling the image's OS ships; older versions
    /// cannot mount filesystems created with newer feature flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mkfs_version: Option<ToolVersion>,
    #[serde(default = "default_root_fs")]
    pub root_fs: FsKind,
    /// Whether the image carries an EFI System Partition image
    #[serde(default)]
    pub efi_image: bool,
    #[serde(default = "default_swap")]
    pub swap: bool,
    #[serde(default)]
    pub hostname_policy: HostnamePolicy,
    #[serde(default)]
    pub kernel_cmdline: Vec<KernelCmdlineEdit>,
}

fn default_root_fs() -> FsKind {
    FsKind::Ext4
}

fn default_swap() -> bool {
    true
}

impl RestoreType {
    /// Check internal consistency of the descriptor
    ///
    /// # Errors
    ///
    /// Returns an error when the descriptor asks for something its plan kind
    /// cannot provide.
    pub fn validate(&self) -> Result<(), DiskError> {
        if self.efi_image && self.plan_kind == PlanKind::Traditional {
            return Err(DiskError::InvalidRestoreType {
                id: self.id.clone(),
                message: "traditional plans carry no EFI system partition".to_string(),
            });
        }
        if self.swap && self.plan_kind == PlanKind::UsbStick {
            return Err(DiskError::InvalidRestoreType {
                id: self.id.clone(),
                message: "USB stick plans never carry swap".to_string(),
            });
        }
        if self.id.trim().is_empty() {
            return Err(DiskError::InvalidRestoreType {
                id: self.id.clone(),
                message: "empty id".to_string(),
            });
        }
        Ok(())
    }

    /// Parse a descriptor from JSON text
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the descriptor is invalid.
    pub fn from_json(text: &str) -> Result<Self, DiskError> {
        let rt: Self = serde_json::from_str(text).map_err(|e| DiskError::InvalidRestoreType {
            id: "<unparsed>".to_string(),
            message: e.to_string(),
        })?;
        rt.validate()?;
        Ok(rt)
    }
}
