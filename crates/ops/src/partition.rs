//! Partitioning and formatting a disk from a plan

#![allow(clippy::cast_precision_loss)]

use refurb_config::ToolPaths;
use refurb_errors::Error;
use refurb_plan::{make_plan, PartitionPlan, PlanEntry, PlanKind, PlanOptions};
use refurb_platform::PlatformCommand;
use refurb_runner::{PartitionTableTask, ProcessTask, RunCtx, RunnerPlan, Task};
use refurb_types::{FsKind, SharedDisk};
use std::path::PathBuf;
use std::sync::PoisonError;

pub(crate) fn device_of(disk: &SharedDisk) -> (PathBuf, u64) {
    let disk = disk.lock().unwrap_or_else(PoisonError::into_inner);
    (disk.device.clone(), disk.size)
}

fn mkfs_estimate(entry: &PlanEntry) -> f64 {
    match entry.fs {
        Some(FsKind::Ext2 | FsKind::Ext3 | FsKind::Ext4) => 5.0 + entry.size as f64 / 20_480.0,
        _ => 3.0,
    }
}

/// Tasks that write `plan` to the disk and format the entries `format`
/// selects
pub(crate) fn layout_tasks(
    tools: &ToolPaths,
    disk: &SharedDisk,
    plan: &PartitionPlan,
    format: impl Fn(&PlanEntry) -> bool,
) -> Vec<Box<dyn Task>> {
    let (device, _) = device_of(disk);
    let dev = device.display().to_string();
    let mut tasks: Vec<Box<dyn Task>> = Vec::new();

    let mut wipefs = PlatformCommand::new(&tools.wipefs);
    wipefs.args(["-a", "-f", dev.as_str()]);
    tasks.push(Box::new(
        ProcessTask::new(format!("clear signatures on {dev}"), wipefs).with_estimate(2.0),
    ));

    let mut sfdisk = PlatformCommand::new(&tools.sfdisk);
    sfdisk
        .args(["--wipe", "always", "--wipe-partitions", "always", dev.as_str()])
        .stdin_bytes(plan.to_sfdisk_script());
    tasks.push(Box::new(
        ProcessTask::new(format!("write {} partition table to {dev}", plan.kind), sfdisk)
            .with_estimate(3.0),
    ));

    let mut partprobe = PlatformCommand::new(&tools.partprobe);
    partprobe.arg(&dev);
    tasks.push(Box::new(
        ProcessTask::new(format!("reload partitions of {dev}"), partprobe).with_estimate(2.0),
    ));
    let mut settle = PlatformCommand::new(&tools.udevadm);
    settle.arg("settle");
    tasks.push(Box::new(
        ProcessTask::new("wait for device nodes", settle).with_estimate(2.0),
    ));

    let partition_device = |number: u32| {
        disk.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .partition_device(number)
    };
    for entry in plan.entries.iter().filter(|e| format(e)) {
        let target = partition_device(entry.number);
        if let Some(command) = entry.mkfs_command(tools, &target) {
            let fs = entry.fs.as_ref().map_or("raw", FsKind::as_str);
            tasks.push(Box::new(
                ProcessTask::new(format!("create {fs} on {}", target.display()), command)
                    .with_estimate(mkfs_estimate(entry)),
            ));
        }
    }
    tasks
}

/// Partition a disk with a fresh layout and format every entry
pub struct PartitionDisk {
    disk: SharedDisk,
    kind: PlanKind,
    options: PlanOptions,
    plan: Option<PartitionPlan>,
}

impl PartitionDisk {
    #[must_use]
    pub fn new(disk: SharedDisk, kind: PlanKind, options: PlanOptions) -> Self {
        Self {
            disk,
            kind,
            options,
            plan: None,
        }
    }

    /// The resolved plan, once prepared
    #[must_use]
    pub fn plan(&self) -> Option<&PartitionPlan> {
        self.plan.as_ref()
    }
}

impl RunnerPlan for PartitionDisk {
    fn name(&self) -> &str {
        "partition"
    }

    fn prepare(&mut self, ctx: &RunCtx) -> Result<Vec<Box<dyn Task>>, Error> {
        let (device, size) = device_of(&self.disk);
        let plan = make_plan(size, self.kind, &self.options)?;
        tracing::info!(
            device = %device.display(),
            kind = %self.kind,
            entries = plan.entries.len(),
            "partitioning disk"
        );
        let mut tasks = layout_tasks(&ctx.config().tools, &self.disk, &plan, |_| true);
        tasks.push(Box::new(PartitionTableTask::new(self.disk.clone())));
        self.plan = Some(plan);
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refurb_config::Config;
    use refurb_events::NullReporter;
    use refurb_types::Disk;
    use std::sync::Arc;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn ctx() -> RunCtx {
        RunCtx::new(Config::default(), Arc::new(NullReporter), None)
    }

    #[test]
    fn efi_layout_produces_ordered_tasks() {
        let disk = Disk::new("/dev/sdx", 250 * GIB).into_shared();
        let mut plan = PartitionDisk::new(disk, PlanKind::Efi, PlanOptions::default());
        let tasks = plan.prepare(&ctx()).unwrap();
        let names: Vec<&str> = tasks.iter().map(|t| t.state().description.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "clear signatures on /dev/sdx",
                "write efi partition table to /dev/sdx",
                "reload partitions of /dev/sdx",
                "wait for device nodes",
                "create vfat on /dev/sdx2",
                "create swap on /dev/sdx3",
                "create ext4 on /dev/sdx4",
                "read partition table of /dev/sdx",
            ]
        );
        assert!(tasks.iter().all(|t| t.estimate_time().is_some()));
        assert_eq!(plan.plan().unwrap().entries.len(), 4);
    }

    #[test]
    fn small_disk_fails_planning() {
        let disk = Disk::new("/dev/sdx", GIB / 2).into_shared();
        let mut plan = PartitionDisk::new(disk, PlanKind::Efi, PlanOptions::default());
        assert!(matches!(plan.prepare(&ctx()), Err(Error::Plan(_))));
    }
}
