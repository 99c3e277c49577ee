//! Wiping disks before they leave the workshop

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use refurb_errors::{Error, TaskError};
use refurb_platform::{OutputStream, PlatformCommand};
use refurb_runner::{
    OutputParser, ProcessTask, RunCtx, RunnerPlan, Task, TaskState,
};
use refurb_types::{SharedDisk, MIB};
use regex::Regex;

use crate::partition::device_of;
use crate::types::WipeMode;

/// Zeroing throughput assumed for the first estimate, in bytes per second
const ZERO_RATE: f64 = 100.0 * MIB as f64;
/// Zeroed at each end of the disk by a quick wipe
const QUICK_ZERO_MIB: u64 = 16;

/// Follows `dd status=progress` output against a known byte total
pub struct DdProgress {
    pattern: Regex,
    total: u64,
    copied: u64,
}

impl DdProgress {
    /// # Errors
    ///
    /// Returns `TaskError::Parse` if the progress pattern fails to compile.
    pub fn new(total: u64) -> Result<Self, TaskError> {
        let pattern = Regex::new(r"^(\d+) bytes").map_err(|e| TaskError::Parse {
            tool: "dd".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            pattern,
            total,
            copied: 0,
        })
    }

    #[must_use]
    pub fn copied(&self) -> u64 {
        self.copied
    }
}

impl OutputParser for DdProgress {
    fn feed(
        &mut self,
        _stream: OutputStream,
        line: &str,
        state: &mut TaskState,
    ) -> Result<(), TaskError> {
        let Some(caps) = self.pattern.captures(line.trim_start()) else {
            return Ok(());
        };
        let Ok(copied) = caps[1].parse::<u64>() else {
            return Ok(());
        };
        self.copied = copied;
        if self.total == 0 || copied == 0 {
            return Ok(());
        }
        let fraction = (copied as f64 / self.total as f64).min(1.0);
        state.set_progress((100.0 * fraction) as u32);
        state.set_estimate(state.elapsed() / fraction);
        state.message = format!("{} of {} MiB", copied / MIB, self.total / MIB);
        Ok(())
    }

    fn reports_progress(&self) -> bool {
        self.copied > 0
    }
}

/// Wipe a whole disk
pub struct WipeDisk {
    disk: SharedDisk,
    mode: WipeMode,
}

impl WipeDisk {
    #[must_use]
    pub fn new(disk: SharedDisk, mode: WipeMode) -> Self {
        Self { disk, mode }
    }
}

fn zero_range(dd: &str, dev: &str, seek_mib: u64, count_mib: u64) -> PlatformCommand {
    let mut cmd = PlatformCommand::new(dd);
    cmd.args([
        "if=/dev/zero".to_string(),
        format!("of={dev}"),
        "bs=1M".to_string(),
        format!("seek={seek_mib}"),
        format!("count={count_mib}"),
        "conv=fsync".to_string(),
        "status=none".to_string(),
    ]);
    cmd
}

impl RunnerPlan for WipeDisk {
    fn name(&self) -> &str {
        "wipe"
    }

    fn prepare(&mut self, ctx: &RunCtx) -> Result<Vec<Box<dyn Task>>, Error> {
        let tools = &ctx.config().tools;
        let (device, size) = device_of(&self.disk);
        let dev = device.display().to_string();
        tracing::info!(device = %dev, mode = %self.mode, size, "wiping disk");

        let mut tasks: Vec<Box<dyn Task>> = Vec::new();
        let mut wipefs = PlatformCommand::new(&tools.wipefs);
        wipefs.args(["-a", "-f", dev.as_str()]);
        let wipefs = ProcessTask::new(format!("clear signatures on {dev}"), wipefs).with_estimate(2.0);

        match self.mode {
            WipeMode::Quick => {
                tasks.push(Box::new(wipefs));
                let size_mib = size / MIB;
                let head = QUICK_ZERO_MIB.min(size_mib);
                tasks.push(Box::new(
                    ProcessTask::new(
                        format!("zero start of {dev}"),
                        zero_range(&tools.dd, &dev, 0, head),
                    )
                    .with_estimate(3.0),
                ));
                // GPT keeps a backup header in the last sectors
                if size_mib > 2 * QUICK_ZERO_MIB {
                    tasks.push(Box::new(
                        ProcessTask::new(
                            format!("zero end of {dev}"),
                            zero_range(&tools.dd, &dev, size_mib - QUICK_ZERO_MIB, QUICK_ZERO_MIB),
                        )
                        .with_estimate(3.0),
                    ));
                }
            }
            WipeMode::Zero => {
                let mut dd = PlatformCommand::new(&tools.dd);
                dd.args([
                    "if=/dev/zero".to_string(),
                    format!("of={dev}"),
                    "bs=4M".to_string(),
                    "iflag=count_bytes".to_string(),
                    format!("count={size}"),
                    "oflag=direct".to_string(),
                    "conv=fsync".to_string(),
                    "status=progress".to_string(),
                ]);
                let parser = DdProgress::new(size)?;
                tasks.push(Box::new(
                    ProcessTask::with_parser(format!("zero all of {dev}"), dd, parser)
                        .with_estimate((size as f64 / ZERO_RATE).max(5.0)),
                ));
                tasks.push(Box::new(wipefs));
            }
            WipeMode::Discard => {
                let mut discard = PlatformCommand::new(&tools.blkdiscard);
                discard.args(["-f", dev.as_str()]);
                tasks.push(Box::new(
                    ProcessTask::new(format!("discard all blocks of {dev}"), discard)
                        .with_estimate(30.0),
                ));
                tasks.push(Box::new(wipefs));
            }
        }

        let mut partprobe = PlatformCommand::new(&tools.partprobe);
        partprobe.arg(&dev);
        // the kernel must forget the old partitions even if the wipe failed
        tasks.push(Box::new(
            ProcessTask::new(format!("reload partitions of {dev}"), partprobe)
                .with_estimate(2.0)
                .as_teardown(),
        ));
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

    fn prepare(mode: WipeMode, size: u64) -> Vec<Box<dyn Task>> {
        let ctx = RunCtx::new(Config::default(), Arc::new(NullReporter), None);
        let disk = Disk::new("/dev/sdx", size).into_shared();
        WipeDisk::new(disk, mode).prepare(&ctx).unwrap()
    }

    fn names(tasks: &[Box<dyn Task>]) -> Vec<String> {
        tasks.iter().map(|t| t.state().description.clone()).collect()
    }

    #[test]
    fn quick_wipe_zeroes_both_ends() {
        let tasks = prepare(WipeMode::Quick, 64 * GIB);
        assert_eq!(
            names(&tasks),
            vec![
                "clear signatures on /dev/sdx",
                "zero start of /dev/sdx",
                "zero end of /dev/sdx",
                "reload partitions of /dev/sdx",
            ]
        );
        assert!(tasks[3].state().teardown);
    }

    #[test]
    fn zero_wipe_estimates_from_size() {
        let tasks = prepare(WipeMode::Zero, 100 * GIB);
        assert_eq!(tasks[0].state().description, "zero all of /dev/sdx");
        assert!((tasks[0].estimate_time().unwrap() - 1024.0).abs() < 1e-6);
    }

    #[test]
    fn dd_progress_tracks_bytes() {
        let mut parser = DdProgress::new(1000 * MIB).unwrap();
        let mut state = TaskState::new("zero");
        state.start();
        parser
            .feed(
                OutputStream::Stderr,
                "262144000 bytes (262 MB, 250 MiB) copied, 2 s, 131 MB/s",
                &mut state,
            )
            .unwrap();
        assert_eq!(state.progress(), 25);
        assert_eq!(parser.copied(), 250 * MIB);
        assert!(parser.reports_progress());
        assert_eq!(state.message, "250 of 1000 MiB");
    }
}
