#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! High-level disk operations for refurb
//!
//! This crate is the orchestration layer between the CLI and the runner.
//! Each operation probes its disk, builds the task plan for the job and hands
//! it to a fresh runner through [`OpsCtx`]. Operations return an
//! [`OperationResult`]; a failed run is a report, not an error.

mod context;
mod disk;
mod image;
mod partition;
mod restore;
mod types;
mod wipe;

pub use context::{CancelHandle, OpsContextBuilder, OpsCtx};
pub use disk::probe_disk;
pub use image::{capture_script, ImagePartition};
pub use partition::PartitionDisk;
pub use restore::{restore_script, RestoreDisk};
pub use types::{RestoreImages, RunReport, TableReport, WipeMode};
pub use wipe::{DdProgress, WipeDisk};

use refurb_errors::{Error, OpsError};
use refurb_plan::{make_plan, PartitionPlan, PlanKind, PlanOptions};
use refurb_runner::{PartitionTableTask, StaticPlan, Task};
use refurb_sync::{CatalogSync, FanoutCopyTask};
use refurb_types::RestoreType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::PoisonError;

/// Operation result that can be serialized for CLI output
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OperationResult {
    /// A partition layout, computed without touching any disk
    Plan(PartitionPlan),
    /// A partition table read from a disk
    DiskTable(TableReport),
    /// A finished runner execution
    Run(RunReport),
    /// Generic success message
    Success(String),
}

impl OperationResult {
    /// Convert to JSON string
    ///
    /// # Errors
    ///
    /// Returns `OpsError::SerializationError` if the result cannot be encoded.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| {
            OpsError::SerializationError {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Check if this is a success result
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            OperationResult::Plan(_) | OperationResult::Success(_) => true,
            OperationResult::DiskTable(table) => table.run.success,
            OperationResult::Run(report) => report.success,
        }
    }
}

/// Compute the layout `kind` would write to a disk of `size` bytes
///
/// # Errors
///
/// Returns a plan error if the disk is too small for the layout.
pub fn plan_layout(size: u64, kind: PlanKind, options: &PlanOptions) -> Result<OperationResult, Error> {
    let plan = make_plan(size, kind, options)?;
    tracing::debug!(%kind, size, entries = plan.entries.len(), "planned layout");
    Ok(OperationResult::Plan(plan))
}

/// Read the partition table of `device`
///
/// # Errors
///
/// Returns an error if the device cannot be opened.
pub async fn read_table(ctx: &OpsCtx, device: &Path) -> Result<OperationResult, Error> {
    let disk = probe_disk(device).await?.into_shared();
    let mut plan = StaticPlan::new(
        "read-table",
        vec![Box::new(PartitionTableTask::new(disk.clone())) as Box<dyn Task>],
    );
    let run = ctx.execute(&mut plan).await?;
    let disk = disk.lock().unwrap_or_else(PoisonError::into_inner).clone();
    Ok(OperationResult::DiskTable(TableReport { disk, run }))
}

/// Partition `device` with a fresh `kind` layout and format every partition
///
/// # Errors
///
/// Returns an error if the device cannot be opened or is too small.
pub async fn partition(ctx: &OpsCtx, device: &Path, kind: PlanKind) -> Result<OperationResult, Error> {
    let disk = probe_disk(device).await?.into_shared();
    let mut plan = PartitionDisk::new(disk, kind, PlanOptions::default());
    Ok(OperationResult::Run(ctx.execute(&mut plan).await?))
}

/// Re-image `device` as `restore_type` from `images`
///
/// # Errors
///
/// Returns an error if the device cannot be opened, an image is missing or
/// the images do not match the restore type.
pub async fn restore(
    ctx: &OpsCtx,
    device: &Path,
    restore_type: RestoreType,
    images: RestoreImages,
) -> Result<OperationResult, Error> {
    let disk = probe_disk(device).await?.into_shared();
    let mut plan = RestoreDisk::new(disk, restore_type, images);
    Ok(OperationResult::Run(ctx.execute(&mut plan).await?))
}

/// Capture partition `number` of `device` into `output`
///
/// # Errors
///
/// Returns an error if the device cannot be opened or the output directory
/// does not exist.
pub async fn image(
    ctx: &OpsCtx,
    device: &Path,
    number: u32,
    output: &Path,
) -> Result<OperationResult, Error> {
    let disk = probe_disk(device).await?.into_shared();
    let mut plan = ImagePartition::new(disk, number, output);
    Ok(OperationResult::Run(ctx.execute(&mut plan).await?))
}

/// Wipe `device`
///
/// # Errors
///
/// Returns an error if the device cannot be opened.
pub async fn wipe(ctx: &OpsCtx, device: &Path, mode: WipeMode) -> Result<OperationResult, Error> {
    let disk = probe_disk(device).await?.into_shared();
    let mut plan = WipeDisk::new(disk, mode);
    Ok(OperationResult::Run(ctx.execute(&mut plan).await?))
}

/// Mirror the image catalog in `source` onto every target
///
/// # Errors
///
/// Returns an error if there are no targets or the catalog cannot be read.
pub async fn sync(ctx: &OpsCtx, source: &Path, targets: Vec<PathBuf>) -> Result<OperationResult, Error> {
    let mut plan = CatalogSync::new(source, targets);
    Ok(OperationResult::Run(ctx.execute(&mut plan).await?))
}

/// Copy one file or device to every target at once
///
/// # Errors
///
/// Returns an error if there are no targets or the source is missing.
pub async fn fanout(ctx: &OpsCtx, source: &Path, targets: &[PathBuf]) -> Result<OperationResult, Error> {
    if targets.is_empty() {
        return Err(refurb_errors::SyncError::NoDestinations.into());
    }
    let size = match tokio::fs::metadata(source).await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => probe_disk(source).await?.size,
        Err(e) => return Err(Error::io_with_path(&e, source)),
    };
    tracing::info!(source = %source.display(), targets = targets.len(), size, "fan-out copy");
    let mut plan = StaticPlan::new(
        "fanout",
        vec![Box::new(FanoutCopyTask::to_paths(source, targets, size)) as Box<dyn Task>],
    );
    Ok(OperationResult::Run(ctx.execute(&mut plan).await?))
}
