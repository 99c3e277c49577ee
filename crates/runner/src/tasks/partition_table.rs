//! Reading a disk's partition table and identifying its filesystems

#![allow(clippy::cast_possible_truncation)]

use async_trait::async_trait;
use refurb_errors::TaskError;
use refurb_platform::{EscalationSignal, OutputStream, PlatformCommand};
use refurb_types::{FsKind, Partition, PartitionTableKind, SharedDisk};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::PoisonError;

use crate::context::RunCtx;
use crate::state::TaskState;
use crate::task::Task;
use crate::tasks::process::{OutputParser, ProcessTask};

#[derive(Debug, Deserialize)]
struct SfdiskDump {
    partitiontable: SfdiskTable,
}

#[derive(Debug, Deserialize)]
struct SfdiskTable {
    label: String,
    #[serde(default = "default_sector_size")]
    sectorsize: u64,
    #[serde(default)]
    partitions: Vec<SfdiskPartition>,
}

#[derive(Debug, Deserialize)]
struct SfdiskPartition {
    node: String,
    start: u64,
    size: u64,
    #[serde(rename = "type")]
    type_code: Option<String>,
    uuid: Option<String>,
    name: Option<String>,
}

fn default_sector_size() -> u64 {
    512
}

/// Trailing digits of a device node, e.g. 12 for `/dev/nvme0n1p12`
fn node_number(node: &str) -> Option<u32> {
    let digits: String = node
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Parse `sfdisk --json` output into the table kind and partition list
///
/// # Errors
///
/// Returns `TaskError::Parse` if the JSON does not describe a partition table.
pub fn parse_sfdisk_json(text: &str) -> Result<(PartitionTableKind, Vec<Partition>), TaskError> {
    let dump: SfdiskDump = serde_json::from_str(text).map_err(|e| TaskError::Parse {
        tool: "sfdisk".to_string(),
        message: e.to_string(),
    })?;
    let table = dump.partitiontable;
    let sector = table.sectorsize;

    let mut partitions = Vec::with_capacity(table.partitions.len());
    for (i, entry) in table.partitions.into_iter().enumerate() {
        let number = node_number(&entry.node).unwrap_or(i as u32 + 1);
        let mut partition =
            Partition::new(number, entry.node, entry.start * sector, entry.size * sector);
        partition.type_code = entry.type_code;
        partition.part_uuid = entry.uuid;
        partition.label = entry.name.filter(|n| !n.is_empty());
        partitions.push(partition);
    }
    partitions.sort_by_key(|p| p.number);
    Ok((PartitionTableKind::from_label(&table.label), partitions))
}

/// Identity of one partition as reported by `blkid -o export`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlkidInfo {
    pub fs_type: Option<String>,
    pub uuid: Option<String>,
    pub part_uuid: Option<String>,
    pub label: Option<String>,
}

impl BlkidInfo {
    /// Copy what was found onto `partition`, keeping fields blkid did not report
    pub fn apply(&self, partition: &mut Partition) {
        if let Some(fs) = &self.fs_type {
            partition.fs_kind = Some(FsKind::from(fs.clone()));
        }
        if self.uuid.is_some() {
            partition.uuid.clone_from(&self.uuid);
        }
        if self.part_uuid.is_some() {
            partition.part_uuid.clone_from(&self.part_uuid);
        }
        if self.label.is_some() {
            partition.label.clone_from(&self.label);
        }
    }
}

/// Parse `KEY=value` lines from `blkid -o export`
#[must_use]
pub fn parse_blkid_export(text: &str) -> BlkidInfo {
    let fields: HashMap<&str, &str> = text
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect();
    let get = |key: &str| {
        fields
            .get(key)
            .filter(|v| !v.is_empty())
            .map(|v| (*v).to_string())
    };
    BlkidInfo {
        fs_type: get("TYPE"),
        uuid: get("UUID"),
        part_uuid: get("PARTUUID"),
        label: get("LABEL"),
    }
}

/// blkid exits 2 when the device carries nothing it recognises
pub const BLKID_GOOD_CODES: [i32; 2] = [0, 2];

fn blkid_command(blkid: &str, device: &std::path::Path) -> PlatformCommand {
    let mut cmd = PlatformCommand::new(blkid);
    cmd.args(["-o", "export", "-p"]).arg(device.display().to_string());
    cmd
}

/// Collects `sfdisk --json` stdout for parsing once the command exits
#[derive(Debug, Default)]
pub struct SfdiskCollector {
    output: String,
}

impl OutputParser for SfdiskCollector {
    fn feed(
        &mut self,
        stream: OutputStream,
        line: &str,
        _state: &mut TaskState,
    ) -> Result<(), TaskError> {
        if stream == OutputStream::Stdout {
            self.output.push_str(line);
            self.output.push('\n');
        }
        Ok(())
    }
}

enum Phase {
    Reading,
    Identifying { next: usize, total: usize },
}

/// Reads the partition table with `sfdisk --json`, then runs one `blkid`
/// lookup per partition, one per poll.
///
/// Progress is `99 * identified / total` until every partition is done. The
/// sfdisk read is an ordinary [`ProcessTask`], so it times out and answers
/// cancellation like any other command.
pub struct PartitionTableTask {
    state: TaskState,
    disk: SharedDisk,
    phase: Phase,
    reader: Option<ProcessTask<SfdiskCollector>>,
}

impl PartitionTableTask {
    #[must_use]
    pub fn new(disk: SharedDisk) -> Self {
        let device = disk
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .id();
        Self {
            state: TaskState::new(format!("read partition table of {device}")).with_estimate(3.0),
            disk,
            phase: Phase::Reading,
            reader: None,
        }
    }

    /// Run even after an earlier step failed or the run was cancelled
    #[must_use]
    pub fn as_teardown(mut self) -> Self {
        self.state.teardown = true;
        self
    }

    fn device(&self) -> PathBuf {
        self.disk
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .device
            .clone()
    }

    fn read_table(&mut self, text: &str) -> Result<(), TaskError> {
        let (table, partitions) = parse_sfdisk_json(text)?;
        let total = partitions.len();
        {
            let mut disk = self.disk.lock().unwrap_or_else(PoisonError::into_inner);
            disk.table = table;
            disk.set_partitions(partitions);
        }
        tracing::debug!(partitions = total, ?table, "partition table read");
        self.phase = Phase::Identifying { next: 0, total };
        Ok(())
    }

    async fn poll_reader(&mut self, ctx: &RunCtx) -> Result<(), TaskError> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(TaskError::failed(
                self.state.description.clone(),
                "sfdisk was never started",
            ));
        };
        let polled = reader.poll(ctx).await;
        if polled.is_err() {
            for line in reader.state().verdict() {
                self.state.append_verdict(line.clone());
            }
        }
        polled?;
        if !reader.state().is_done() {
            return Ok(());
        }
        let text = std::mem::take(&mut reader.parser_mut().output);
        self.read_table(&text)
    }

    async fn identify(&mut self, ctx: &RunCtx, index: usize) -> Result<(), TaskError> {
        let device = {
            let disk = self.disk.lock().unwrap_or_else(PoisonError::into_inner);
            match disk.partitions.get(index) {
                Some(p) => p.device.clone(),
                None => return Ok(()),
            }
        };
        let cmd = blkid_command(&ctx.config().tools.blkid, &device);
        let output = ctx
            .platform()
            .execute_command(ctx.platform_context(), cmd)
            .await
            .map_err(|e| TaskError::failed(self.state.description.clone(), e.to_string()))?;
        let code = output.status.code().unwrap_or(-1);
        if !BLKID_GOOD_CODES.contains(&code) {
            return Err(TaskError::ProcessFailed {
                command: format!("blkid {}", device.display()),
                status: code,
                stdout: output.stdout_lossy(),
                stderr: output.stderr_lossy(),
            });
        }

        let info = parse_blkid_export(&output.stdout_lossy());
        let mut disk = self.disk.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(partition) = disk.partitions.get_mut(index) {
            info.apply(partition);
        }
        Ok(())
    }
}

#[async_trait]
impl Task for PartitionTableTask {
    fn state(&self) -> &TaskState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TaskState {
        &mut self.state
    }

    async fn setup(&mut self, ctx: &RunCtx) -> Result<(), TaskError> {
        let mut cmd = PlatformCommand::new(&ctx.config().tools.sfdisk);
        cmd.arg("--json").arg(self.device().display().to_string());
        let mut reader = ProcessTask::with_parser(
            self.state.description.clone(),
            cmd,
            SfdiskCollector::default(),
        )
        .with_estimate(self.state.estimate().unwrap_or(3.0));
        reader.state_mut().start();
        reader.setup(ctx).await?;
        self.reader = Some(reader);
        Ok(())
    }

    async fn poll(&mut self, ctx: &RunCtx) -> Result<(), TaskError> {
        match self.phase {
            Phase::Reading => self.poll_reader(ctx).await,
            Phase::Identifying { next, total } => {
                if next >= total {
                    self.state.message = format!("{total} partitions");
                    self.state.complete();
                    return Ok(());
                }
                self.identify(ctx, next).await?;
                let done = next + 1;
                self.state.set_progress((99 * done / total) as u32);
                self.phase = Phase::Identifying { next: done, total };
                if done == total {
                    self.state.message = format!("{total} partitions");
                    self.state.complete();
                }
                Ok(())
            }
        }
    }

    async fn teardown(&mut self, ctx: &RunCtx) -> Result<(), TaskError> {
        match self.reader.as_mut() {
            Some(reader) => reader.teardown(ctx).await,
            None => Ok(()),
        }
    }

    fn terminate(&mut self) -> Result<Option<EscalationSignal>, TaskError> {
        match (&self.phase, self.reader.as_mut()) {
            (Phase::Reading, Some(reader)) => reader.terminate(),
            _ => Ok(None),
        }
    }
}

/// Collects `blkid -o export` output and writes it onto one partition
pub struct BlkidParser {
    disk: SharedDisk,
    number: u32,
    output: String,
}

impl OutputParser for BlkidParser {
    fn feed(
        &mut self,
        stream: OutputStream,
        line: &str,
        _state: &mut TaskState,
    ) -> Result<(), TaskError> {
        if stream == OutputStream::Stdout {
            self.output.push_str(line);
            self.output.push('\n');
        }
        Ok(())
    }

    fn finish(&mut self, state: &mut TaskState) -> Result<(), TaskError> {
        let info = parse_blkid_export(&self.output);
        let mut disk = self.disk.lock().unwrap_or_else(PoisonError::into_inner);
        let device = disk.id();
        let partition = disk
            .partitions
            .iter_mut()
            .find(|p| p.number == self.number)
            .ok_or_else(|| {
                TaskError::failed(
                    state.description.clone(),
                    format!("partition {} not on {device}", self.number),
                )
            })?;
        info.apply(partition);
        state.message = match (&info.fs_type, &info.uuid) {
            (Some(fs), Some(uuid)) => format!("{fs} {uuid}"),
            (Some(fs), None) => fs.clone(),
            _ => "no filesystem".to_string(),
        };
        Ok(())
    }
}

/// One-shot identification of a single partition
pub type FilesystemIdTask = ProcessTask<BlkidParser>;

/// Build a task that refreshes uuid, label and filesystem type of
/// partition `number`
#[must_use]
pub fn filesystem_id_task(blkid: &str, disk: SharedDisk, number: u32) -> FilesystemIdTask {
    let device = disk
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .partition_device(number);
    let parser = BlkidParser {
        disk,
        number,
        output: String::new(),
    };
    ProcessTask::with_parser(
        format!("identify {}", device.display()),
        blkid_command(blkid, &device),
        parser,
    )
    .good_codes(&BLKID_GOOD_CODES)
    .with_estimate(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPT_DUMP: &str = r#"{
       "partitiontable": {
          "label": "gpt",
          "id": "5B1B2D5C-0A4D-4C4E-9D6B-7C8E1C7D2E11",
          "device": "/dev/sda",
          "unit": "sectors",
          "firstlba": 2048,
          "lastlba": 134217694,
          "sectorsize": 512,
          "partitions": [
             {"node": "/dev/sda2", "start": 4096, "size": 1048576,
              "type": "C12A7328-F81F-11D2-BA4B-00A0C93EC93B",
              "uuid": "0A1B2C3D-0000-0000-0000-000000000002", "name": "EFI"},
             {"node": "/dev/sda1", "start": 2048, "size": 2048,
              "type": "21686148-6449-6E6F-744E-656564454649",
              "uuid": "0A1B2C3D-0000-0000-0000-000000000001"}
          ]
       }
    }"#;

    #[test]
    fn parses_gpt_dump() {
        let (table, parts) = parse_sfdisk_json(GPT_DUMP).unwrap();
        assert_eq!(table, PartitionTableKind::Gpt);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].number, 1);
        assert_eq!(parts[0].start, 2048 * 512);
        assert_eq!(parts[1].size, 1_048_576 * 512);
        assert_eq!(parts[1].label.as_deref(), Some("EFI"));
        assert_eq!(
            parts[1].part_uuid.as_deref(),
            Some("0A1B2C3D-0000-0000-0000-000000000002")
        );
    }

    #[test]
    fn parses_dos_dump_without_sector_size() {
        let text = r#"{"partitiontable": {"label": "dos", "device": "/dev/nvme0n1",
            "partitions": [{"node": "/dev/nvme0n1p1", "start": 2048, "size": 4096,
            "type": "83", "bootable": true}]}}"#;
        let (table, parts) = parse_sfdisk_json(text).unwrap();
        assert_eq!(table, PartitionTableKind::Dos);
        assert_eq!(parts[0].number, 1);
        assert_eq!(parts[0].type_code.as_deref(), Some("83"));
        assert_eq!(parts[0].start, 2048 * 512);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            parse_sfdisk_json("sfdisk: cannot open /dev/sdz"),
            Err(TaskError::Parse { .. })
        ));
    }

    #[test]
    fn blkid_export_fields() {
        let info = parse_blkid_export(
            "DEVNAME=/dev/sda3\nUUID=3f1c-aa\nBLOCK_SIZE=4096\nTYPE=ext4\nPARTUUID=abcd-03\n",
        );
        assert_eq!(info.fs_type.as_deref(), Some("ext4"));
        assert_eq!(info.uuid.as_deref(), Some("3f1c-aa"));
        assert_eq!(info.part_uuid.as_deref(), Some("abcd-03"));
        assert!(info.label.is_none());

        let mut partition = Partition::new(3, "/dev/sda3", 0, 0);
        partition.label = Some("keep".into());
        info.apply(&mut partition);
        assert_eq!(partition.fs_kind, Some(FsKind::Ext4));
        assert_eq!(partition.label.as_deref(), Some("keep"));
    }

    #[test]
    fn node_numbers() {
        assert_eq!(node_number("/dev/sda12"), Some(12));
        assert_eq!(node_number("/dev/nvme0n1p3"), Some(3));
        assert_eq!(node_number("/dev/sda"), None);
    }
}
