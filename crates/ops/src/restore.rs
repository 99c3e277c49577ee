//! Re-imaging a disk from partclone images

#![allow(clippy::cast_precision_loss)]

use refurb_config::{Config, ToolPaths};
use refurb_errors::{Error, OpsError, TaskError};
use refurb_plan::{make_plan, PartitionPlan, PlanOptions};
use refurb_platform::{shell_quote, PlatformCommand};
use refurb_runner::{clone_task, PartitionTableTask, ProcessTask, RunCtx, RunnerPlan, Task};
use refurb_types::{FsKind, RestoreType, SharedDisk, MIB};
use std::path::{Path, PathBuf};
use std::sync::PoisonError;

use crate::partition::{device_of, layout_tasks};
use crate::types::RestoreImages;

/// Restore throughput assumed for the first estimate, in bytes per second
const RESTORE_RATE: f64 = 80.0 * MIB as f64;
/// Rough ratio of restored data to compressed image size
const COMPRESSION_RATIO: f64 = 2.5;

/// Shell pipeline that streams `image` into `partclone.<fs> -r` on `target`
#[must_use]
pub fn restore_script(tools: &ToolPaths, image: &Path, fs: &FsKind, target: &Path) -> String {
    let partclone = shell_quote(&tools.partclone(fs.partclone_suffix()));
    let image_arg = shell_quote(&image.display().to_string());
    let target_arg = shell_quote(&target.display().to_string());
    if is_compressed(image) {
        format!(
            "{} -dc -q {image_arg} | {partclone} -r -s - -o {target_arg}",
            shell_quote(&tools.zstd)
        )
    } else {
        format!("{partclone} -r -s {image_arg} -o {target_arg}")
    }
}

fn is_compressed(image: &Path) -> bool {
    image.extension().is_some_and(|ext| ext == "zst")
}

fn restore_estimate(image: &Path) -> f64 {
    let size = std::fs::metadata(image).map_or(0, |m| m.len()) as f64;
    let factor = if is_compressed(image) { COMPRESSION_RATIO } else { 1.0 };
    (size * factor / RESTORE_RATE).max(10.0)
}

fn require_file(path: &Path) -> Result<(), Error> {
    if path.is_file() {
        Ok(())
    } else {
        Err(OpsError::ImageNotFound {
            path: path.display().to_string(),
        }
        .into())
    }
}

/// Partition a disk for a restore type and lay its images down.
///
/// The root filesystem comes from the root image, followed by a forced
/// check and a resize to fill its partition. Entries without an image are
/// formatted fresh.
pub struct RestoreDisk {
    disk: SharedDisk,
    restore_type: RestoreType,
    images: RestoreImages,
    plan: Option<PartitionPlan>,
}

impl RestoreDisk {
    #[must_use]
    pub fn new(disk: SharedDisk, restore_type: RestoreType, images: RestoreImages) -> Self {
        Self {
            disk,
            restore_type,
            images,
            plan: None,
        }
    }

    #[must_use]
    pub fn plan(&self) -> Option<&PartitionPlan> {
        self.plan.as_ref()
    }

    fn check_inputs(&self) -> Result<(), Error> {
        self.restore_type.validate()?;
        require_file(&self.images.root)?;
        match (&self.images.efi, self.restore_type.efi_image) {
            (Some(efi), true) => require_file(efi),
            (None, true) => Err(OpsError::RestoreTypeMismatch {
                id: self.restore_type.id.clone(),
                what: "an EFI partition image".to_string(),
            }
            .into()),
            (Some(_), false) => Err(OpsError::RestoreTypeMismatch {
                id: self.restore_type.id.clone(),
                what: "no EFI partition image".to_string(),
            }
            .into()),
            (None, false) => Ok(()),
        }
    }

    fn image_task(
        &self,
        config: &Config,
        description: String,
        image: &Path,
        fs: &FsKind,
        target: &Path,
    ) -> Result<Box<dyn Task>, TaskError> {
        let command = PlatformCommand::shell(&restore_script(&config.tools, image, fs, target));
        let task = clone_task(
            description,
            command,
            restore_estimate(image),
            config.runner.estimate_window,
        )?;
        Ok(Box::new(task))
    }
}

impl RunnerPlan for RestoreDisk {
    fn name(&self) -> &str {
        "restore"
    }

    fn prepare(&mut self, ctx: &RunCtx) -> Result<Vec<Box<dyn Task>>, Error> {
        self.check_inputs()?;
        let (device, size) = device_of(&self.disk);
        let rt = &self.restore_type;
        let plan = make_plan(size, rt.plan_kind, &PlanOptions::from_restore_type(rt))?;
        let root = plan.root().cloned().ok_or_else(|| OpsError::OperationFailed {
            message: format!("{} plan has no root partition", rt.plan_kind),
        })?;
        let esp_from_image = self.images.efi.as_ref().and(plan.esp().cloned());
        tracing::info!(
            device = %device.display(),
            restore_type = %rt.id,
            image = %self.images.root.display(),
            "restoring disk"
        );
        if rt.hostname_policy != refurb_types::HostnamePolicy::Keep || !rt.kernel_cmdline.is_empty() {
            tracing::debug!(restore_type = %rt.id, "hostname and kernel command line edits are left to the post-restore hooks");
        }

        let config = ctx.config();
        let skip: Vec<u32> = std::iter::once(root.number)
            .chain(esp_from_image.as_ref().map(|e| e.number))
            .collect();
        let mut tasks = layout_tasks(&config.tools, &self.disk, &plan, |e| {
            !skip.contains(&e.number)
        });

        let partition_device = |number: u32| {
            self.disk
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .partition_device(number)
        };

        if let (Some(esp), Some(image)) = (&esp_from_image, &self.images.efi) {
            let target = partition_device(esp.number);
            tasks.push(self.image_task(
                config,
                format!("restore EFI partition {}", target.display()),
                image,
                &FsKind::Vfat,
                &target,
            )?);
        }

        let root_fs = root.fs.clone().unwrap_or(FsKind::Ext4);
        let target: PathBuf = partition_device(root.number);
        tasks.push(self.image_task(
            config,
            format!("restore {} to {}", rt.id, target.display()),
            &self.images.root,
            &root_fs,
            &target,
        )?);

        if matches!(root_fs, FsKind::Ext2 | FsKind::Ext3 | FsKind::Ext4) {
            let dev = target.display().to_string();
            let mut fsck = PlatformCommand::new(&config.tools.e2fsck);
            fsck.args(["-f", "-y", dev.as_str()]);
            // 1: errors were found and corrected
            tasks.push(Box::new(
                ProcessTask::new(format!("check filesystem on {dev}"), fsck)
                    .good_codes(&[0, 1])
                    .with_estimate(15.0),
            ));
            let mut resize = PlatformCommand::new(&config.tools.resize2fs);
            resize.arg(&dev);
            tasks.push(Box::new(
                ProcessTask::new(format!("grow filesystem on {dev}"), resize).with_estimate(10.0),
            ));
        }

        // the kernel and the report must see the disk as it was left
        let dev = device.display().to_string();
        let mut partprobe = PlatformCommand::new(&config.tools.partprobe);
        partprobe.arg(&dev);
        tasks.push(Box::new(
            ProcessTask::new(format!("reload partitions of {dev}"), partprobe)
                .with_estimate(2.0)
                .as_teardown(),
        ));
        tasks.push(Box::new(PartitionTableTask::new(self.disk.clone()).as_teardown()));
        self.plan = Some(plan);
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refurb_events::NullReporter;
    use refurb_types::{Disk, PlanKind};
    use std::sync::Arc;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn ctx() -> RunCtx {
        RunCtx::new(Config::default(), Arc::new(NullReporter), None)
    }

    fn restore_type(json: &str) -> RestoreType {
        RestoreType::from_json(json).unwrap()
    }

    #[test]
    fn compressed_images_are_piped_through_zstd() {
        let tools = ToolPaths::default();
        let script = restore_script(
            &tools,
            Path::new("/srv/images/mint 21.img.zst"),
            &FsKind::Ext4,
            Path::new("/dev/sdb4"),
        );
        assert_eq!(
            script,
            "zstd -dc -q '/srv/images/mint 21.img.zst' | partclone.extfs -r -s - -o /dev/sdb4"
        );
        let raw = restore_script(&tools, Path::new("/srv/esp.img"), &FsKind::Vfat, Path::new("/dev/sdb2"));
        assert_eq!(raw, "partclone.vfat -r -s /srv/esp.img -o /dev/sdb2");
    }

    #[test]
    fn restore_skips_formatting_restored_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root.img.zst");
        let efi = dir.path().join("esp.img");
        std::fs::write(&root, b"x").unwrap();
        std::fs::write(&efi, b"x").unwrap();

        let disk = Disk::new("/dev/sdx", 120 * GIB).into_shared();
        let rt = restore_type(r#"{"id": "mint-21", "plan_kind": "efi", "efi_image": true}"#);
        let mut plan = RestoreDisk::new(
            disk,
            rt,
            RestoreImages {
                root,
                efi: Some(efi),
            },
        );
        let tasks = plan.prepare(&ctx()).unwrap();
        let names: Vec<&str> = tasks.iter().map(|t| t.state().description.as_str()).collect();
        assert!(names.contains(&"create swap on /dev/sdx3"));
        assert!(!names.iter().any(|n| n.starts_with("create vfat") || n.starts_with("create ext4")));
        assert!(names.contains(&"restore EFI partition /dev/sdx2"));
        assert!(names.contains(&"restore mint-21 to /dev/sdx4"));
        assert_eq!(names.last(), Some(&"read partition table of /dev/sdx"));
        assert_eq!(plan.plan().unwrap().kind, PlanKind::Efi);
    }

    #[test]
    fn restore_cleanup_runs_as_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root.img");
        std::fs::write(&root, b"x").unwrap();
        let disk = Disk::new("/dev/sdx", 120 * GIB).into_shared();
        let rt = restore_type(r#"{"id": "mint-21", "plan_kind": "traditional"}"#);
        let mut plan = RestoreDisk::new(disk, rt, RestoreImages { root, efi: None });
        let tasks = plan.prepare(&ctx()).unwrap();

        let teardown: Vec<&str> = tasks
            .iter()
            .filter(|t| t.state().teardown)
            .map(|t| t.state().description.as_str())
            .collect();
        assert_eq!(
            teardown,
            vec!["reload partitions of /dev/sdx", "read partition table of /dev/sdx"]
        );
        // everything that writes the disk stops on cancel
        assert!(tasks
            .iter()
            .filter(|t| t.state().description.starts_with("restore "))
            .all(|t| !t.state().teardown));
    }

    #[test]
    fn missing_image_is_reported_before_planning() {
        let disk = Disk::new("/dev/sdx", 120 * GIB).into_shared();
        let rt = restore_type(r#"{"id": "mint-21", "plan_kind": "traditional"}"#);
        let mut plan = RestoreDisk::new(
            disk,
            rt,
            RestoreImages {
                root: PathBuf::from("/nonexistent/root.img"),
                efi: None,
            },
        );
        assert!(matches!(
            plan.prepare(&ctx()),
            Err(Error::Ops(OpsError::ImageNotFound { .. }))
        ));
    }

    #[test]
    fn efi_restore_types_need_an_efi_image() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root.img");
        std::fs::write(&root, b"x").unwrap();
        let disk = Disk::new("/dev/sdx", 120 * GIB).into_shared();
        let rt = restore_type(r#"{"id": "mint-21", "plan_kind": "efi", "efi_image": true}"#);
        let mut plan = RestoreDisk::new(disk, rt, RestoreImages { root, efi: None });
        assert!(matches!(
            plan.prepare(&ctx()),
            Err(Error::Ops(OpsError::RestoreTypeMismatch { .. }))
        ));
    }
}
