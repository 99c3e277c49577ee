//! Filesystem-maker invocations for plan entries

use refurb_config::ToolPaths;
use refurb_platform::PlatformCommand;
use refurb_types::{FsKind, ToolVersion};
use std::path::Path;

use crate::entry::PlanEntry;

const METADATA_CSUM_SINCE: ToolVersion = ToolVersion::new(1, 43, 0);
const SIXTY_FOUR_BIT_SINCE: ToolVersion = ToolVersion::new(1, 42, 0);

/// Extra `mkfs.ext4` options so an OS shipping e2fsprogs `version` can still
/// mount and check the filesystem
#[must_use]
pub fn legacy_ext4_features(version: Option<ToolVersion>) -> Vec<String> {
    let Some(version) = version else {
        return Vec::new();
    };
    let mut disabled = Vec::new();
    if version < METADATA_CSUM_SINCE {
        disabled.push("^metadata_csum");
    }
    if version < SIXTY_FOUR_BIT_SINCE {
        disabled.push("^64bit");
    }
    if disabled.is_empty() {
        Vec::new()
    } else {
        vec!["-O".to_string(), disabled.join(",")]
    }
}

/// Command that creates `fs` on `device`. Returns `None` for kinds we
/// do not format (BIOS boot stubs, foreign filesystems).
#[must_use]
pub fn mkfs_command(
    tools: &ToolPaths,
    fs: &FsKind,
    label: Option<&str>,
    options: &[String],
    device: &Path,
) -> Option<PlatformCommand> {
    let device = device.display().to_string();
    let mut cmd = match fs {
        FsKind::Ext2 | FsKind::Ext3 | FsKind::Ext4 => {
            let mut cmd = PlatformCommand::new(&tools.mkfs_ext4);
            cmd.args(["-F", "-q", "-t", fs.as_str()]);
            if let Some(label) = label {
                cmd.args(["-L", label]);
            }
            cmd
        }
        FsKind::Vfat => {
            let mut cmd = PlatformCommand::new(&tools.mkfs_vfat);
            cmd.args(["-F", "32"]);
            if let Some(label) = label {
                // FAT labels are upper case and at most 11 bytes
                let label: String = label.to_ascii_uppercase().chars().take(11).collect();
                cmd.args(["-n", label.as_str()]);
            }
            cmd
        }
        FsKind::Swap => {
            let mut cmd = PlatformCommand::new(&tools.mkswap);
            if let Some(label) = label {
                cmd.args(["-L", label]);
            }
            cmd
        }
        _ => return None,
    };
    cmd.args(options);
    cmd.arg(device);
    Some(cmd)
}

impl PlanEntry {
    /// [`mkfs_command`] for this entry, labelled with its name
    #[must_use]
    pub fn mkfs_command(&self, tools: &ToolPaths, device: &Path) -> Option<PlatformCommand> {
        self.fs.as_ref().and_then(|fs| {
            mkfs_command(tools, fs, self.name.as_deref(), &self.mkfs_options, device)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_tooling_disables_checksums() {
        assert!(legacy_ext4_features(None).is_empty());
        assert!(legacy_ext4_features(Some(ToolVersion::new(1, 46, 5))).is_empty());
        assert_eq!(
            legacy_ext4_features(Some(ToolVersion::new(1, 42, 9))),
            vec!["-O".to_string(), "^metadata_csum".to_string()]
        );
        assert_eq!(
            legacy_ext4_features(Some(ToolVersion::new(1, 41, 0))),
            vec!["-O".to_string(), "^metadata_csum,^64bit".to_string()]
        );
    }

    #[test]
    fn ext4_command_line() {
        let opts = legacy_ext4_features(Some(ToolVersion::new(1, 42, 0)));
        let cmd = mkfs_command(
            &ToolPaths::default(),
            &FsKind::Ext4,
            Some("root"),
            &opts,
            Path::new("/dev/sdb4"),
        )
        .unwrap();
        assert_eq!(
            cmd.display(),
            "mkfs.ext4 -F -q -t ext4 -L root -O ^metadata_csum /dev/sdb4"
        );
    }

    #[test]
    fn vfat_label_is_shortened() {
        let cmd = mkfs_command(
            &ToolPaths::default(),
            &FsKind::Vfat,
            Some("efi-system-partition"),
            &[],
            Path::new("/dev/sdb2"),
        )
        .unwrap();
        assert_eq!(cmd.display(), "mkfs.vfat -F 32 -n EFI-SYSTEM- /dev/sdb2");
    }

    #[test]
    fn unformatted_kinds_have_no_command() {
        let cmd = mkfs_command(
            &ToolPaths::default(),
            &FsKind::Ntfs,
            None,
            &[],
            Path::new("/dev/sdb1"),
        );
        assert!(cmd.is_none());
    }
}
