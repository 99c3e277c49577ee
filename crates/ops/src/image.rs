//! Capturing a partition into a compressed image

#![allow(clippy::cast_precision_loss)]

use refurb_config::Config;
use refurb_errors::{Error, OpsError, TaskError};
use refurb_platform::{shell_quote, PlatformCommand};
use refurb_runner::{
    clone_task, DeferredTask, PartitionTableTask, ProcessTask, RunCtx, RunnerPlan, Task,
};
use refurb_types::{FsKind, Partition, SharedDisk, MIB};
use std::path::{Path, PathBuf};
use std::sync::PoisonError;

use crate::partition::device_of;

/// Capture throughput assumed for the first estimate, in bytes per second
const CAPTURE_RATE: f64 = 60.0 * MIB as f64;

/// Shell pipeline that images `partition` into zstd-compressed `output`.
///
/// Filesystems partclone understands are captured used-blocks-only; anything
/// else is copied raw.
#[must_use]
pub fn capture_script(config: &Config, partition: &Partition, output: &Path) -> String {
    let tools = &config.tools;
    let source = shell_quote(&partition.device.display().to_string());
    let sink = format!(
        "{} -q -T0 -f -o {}",
        shell_quote(&tools.zstd),
        shell_quote(&output.display().to_string())
    );
    let suffix = partition
        .fs_kind
        .as_ref()
        .map_or("dd", FsKind::partclone_suffix);
    if suffix == "dd" {
        format!(
            "{} if={source} bs=4M status=none | {sink}",
            shell_quote(&tools.dd)
        )
    } else {
        format!(
            "{} -c -s {source} -o - | {sink}",
            shell_quote(&tools.partclone(suffix))
        )
    }
}

fn capture_task(
    ctx: &RunCtx,
    disk: &SharedDisk,
    number: u32,
    output: &Path,
) -> Result<Box<dyn Task>, TaskError> {
    let partition = disk
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .require_partition(&number.to_string())
        .cloned()
        .map_err(|e| TaskError::setup(format!("image partition {number}"), e.to_string()))?;
    let config = ctx.config();
    let description = format!(
        "image {} ({}) to {}",
        partition.device.display(),
        partition.fs_kind.as_ref().map_or("unknown", FsKind::as_str),
        output.display()
    );
    let command = PlatformCommand::shell(&capture_script(config, &partition, output));
    let estimate = (partition.size as f64 / CAPTURE_RATE).max(5.0);
    let raw = partition
        .fs_kind
        .as_ref()
        .is_none_or(|fs| fs.partclone_suffix() == "dd");
    if raw {
        Ok(Box::new(ProcessTask::new(description, command).with_estimate(estimate)))
    } else {
        Ok(Box::new(clone_task(
            description,
            command,
            estimate,
            config.runner.estimate_window,
        )?))
    }
}

/// Read the partition table, image one partition, then verify the image
pub struct ImagePartition {
    disk: SharedDisk,
    number: u32,
    output: PathBuf,
}

impl ImagePartition {
    #[must_use]
    pub fn new(disk: SharedDisk, number: u32, output: impl Into<PathBuf>) -> Self {
        Self {
            disk,
            number,
            output: output.into(),
        }
    }
}

impl RunnerPlan for ImagePartition {
    fn name(&self) -> &str {
        "image"
    }

    fn prepare(&mut self, ctx: &RunCtx) -> Result<Vec<Box<dyn Task>>, Error> {
        let parent = self
            .output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        if !parent.is_dir() {
            return Err(OpsError::InvalidOperation {
                operation: format!("image output directory {} does not exist", parent.display()),
            }
            .into());
        }
        let (device, size) = device_of(&self.disk);
        tracing::info!(
            device = %device.display(),
            partition = self.number,
            output = %self.output.display(),
            "imaging partition"
        );

        let disk = self.disk.clone();
        let number = self.number;
        let output = self.output.clone();
        let capture = DeferredTask::new(
            format!("image partition {number} of {}", device.display()),
            (size as f64 / CAPTURE_RATE).max(5.0),
            move |ctx: &RunCtx| capture_task(ctx, &disk, number, &output),
        );

        let mut verify = PlatformCommand::new(&ctx.config().tools.zstd);
        verify.args(["-t", "-q"]).arg(self.output.display().to_string());

        let mut tasks: Vec<Box<dyn Task>> = Vec::new();
        tasks.push(Box::new(PartitionTableTask::new(self.disk.clone())));
        tasks.push(Box::new(capture));
        tasks.push(Box::new(
            ProcessTask::new(format!("verify {}", self.output.display()), verify)
                .with_estimate(10.0),
        ));
        Ok(tasks)
    }
}
