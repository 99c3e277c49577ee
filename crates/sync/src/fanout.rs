//! The fan-out engine as a runner task

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use async_trait::async_trait;
use refurb_errors::{SyncError, TaskError};
use refurb_events::EventEmitter;
use refurb_runner::{RunCtx, Task, TaskState};
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::io::AsyncSeekExt;
use tokio::task::JoinHandle;

use crate::engine::{SyncEngine, SyncMonitor, SyncOutcome, SyncReport};
use crate::writer::{DestinationWriter, FileWriter};

/// Throughput assumed for the first estimate, in bytes per second
pub const ASSUMED_RATE: f64 = 100.0 * 1024.0 * 1024.0;

/// Where one destination's bytes go
pub enum DestinationSpec {
    /// Opened with [`FileWriter`] when the task starts
    Path(PathBuf),
    /// A writer supplied by the caller
    Writer(Box<dyn DestinationWriter>),
}

/// Copies one source file to every destination concurrently.
///
/// The copy itself runs on its own tokio task; polls only sample the
/// scoreboards. A destination that dies only leaves a verdict line; the task
/// fails when no destination survived.
pub struct FanoutCopyTask {
    state: TaskState,
    source: PathBuf,
    destinations: Vec<(String, DestinationSpec)>,
    copy: Option<JoinHandle<Result<SyncReport, SyncError>>>,
    monitor: Option<SyncMonitor>,
    report: Option<SyncReport>,
}

impl FanoutCopyTask {
    /// `size_hint` (bytes) seeds the time estimate before the source is opened
    #[must_use]
    pub fn new(
        source: impl Into<PathBuf>,
        destinations: Vec<(String, DestinationSpec)>,
        size_hint: u64,
    ) -> Self {
        let source = source.into();
        let description = format!(
            "copy {} to {} destinations",
            source
                .file_name()
                .map_or_else(|| source.display().to_string(), |n| n.to_string_lossy().into_owned()),
            destinations.len()
        );
        Self {
            state: TaskState::new(description).with_estimate(estimate_for(size_hint)),
            source,
            destinations,
            copy: None,
            monitor: None,
            report: None,
        }
    }

    /// Copy to plain paths (devices or files) keyed by their file name
    #[must_use]
    pub fn to_paths(source: impl Into<PathBuf>, targets: &[PathBuf], size_hint: u64) -> Self {
        let destinations = targets
            .iter()
            .map(|path| {
                let key = path
                    .file_name()
                    .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
                (key, DestinationSpec::Path(path.clone()))
            })
            .collect();
        Self::new(source, destinations, size_hint)
    }

    /// The finished copy, once the task is done
    #[must_use]
    pub fn report(&self) -> Option<&SyncReport> {
        self.report.as_ref()
    }

    fn conclude(&mut self, report: SyncReport) -> Result<(), TaskError> {
        for destination in &report.destinations {
            let line = if destination.alive {
                format!(
                    "{} ({}): {} bytes written",
                    destination.key, destination.target, destination.completed_size
                )
            } else {
                format!(
                    "{} ({}) failed after {} bytes: {}",
                    destination.key,
                    destination.target,
                    destination.completed_size,
                    destination.error.as_deref().unwrap_or("unknown error")
                )
            };
            self.state.append_verdict(line);
        }
        self.state.message = format!("{} bytes, {}", report.bytes_read, report.outcome);
        let outcome = report.outcome;
        let failed = report.failed();
        let total = report.destinations.len();
        self.report = Some(report);
        match outcome {
            SyncOutcome::Completed => {
                self.state.complete();
                Ok(())
            }
            SyncOutcome::CompletedWithFailures => {
                tracing::warn!(
                    task = %self.state.description,
                    failed,
                    total,
                    "copy finished with failed destinations"
                );
                self.state.complete();
                Ok(())
            }
            SyncOutcome::Failed => Err(TaskError::failed(
                self.state.description.clone(),
                SyncError::AllDestinationsFailed { total }.to_string(),
            )),
        }
    }

    fn sample_progress(&mut self) {
        let Some(monitor) = &self.monitor else {
            return;
        };
        let live: Vec<_> = monitor.snapshots().into_iter().filter(|s| s.alive).collect();
        let Some(slowest) = live.iter().min_by_key(|s| s.completed_size) else {
            return;
        };
        self.state.set_progress(slowest.percent() as u32);
        if let Some(eta) = slowest.eta() {
            let estimate = self.state.elapsed() + eta.as_secs_f64();
            self.state.set_estimate(estimate);
        }
    }
}

fn estimate_for(bytes: u64) -> f64 {
    (bytes as f64 / ASSUMED_RATE).max(1.0)
}

#[async_trait]
impl Task for FanoutCopyTask {
    fn state(&self) -> &TaskState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TaskState {
        &mut self.state
    }

    async fn setup(&mut self, ctx: &RunCtx) -> Result<(), TaskError> {
        let setup_error = |e: &dyn std::fmt::Display| {
            TaskError::setup(self.state.description.clone(), e.to_string())
        };
        let mut source = tokio::fs::File::open(&self.source)
            .await
            .map_err(|e| setup_error(&e))?;
        // block devices report a zero length; seeking finds their size
        let total = source
            .seek(SeekFrom::End(0))
            .await
            .map_err(|e| setup_error(&e))?;
        source
            .seek(SeekFrom::Start(0))
            .await
            .map_err(|e| setup_error(&e))?;
        self.state.set_estimate(estimate_for(total));

        let events = ctx.platform_context().event_sender().cloned();
        let mut engine = SyncEngine::new(&ctx.config().sync, total).with_events(events);
        for (key, spec) in std::mem::take(&mut self.destinations) {
            match spec {
                DestinationSpec::Writer(writer) => engine.add_destination(key, writer),
                DestinationSpec::Path(path) => match FileWriter::open(&path).await {
                    Ok(writer) => engine.add_destination(key, Box::new(writer)),
                    Err(e) => {
                        tracing::warn!(%key, "destination unavailable: {e}");
                        engine.add_failed_destination(key, path.display().to_string(), e.to_string());
                    }
                },
            }
        }
        self.monitor = Some(engine.monitor());

        let name = self.source.display().to_string();
        let reporter = ctx.reporter().clone();
        let run_id = ctx.run_id();
        self.copy = Some(tokio::spawn(async move {
            engine.run(&name, source, reporter, run_id).await
        }));
        Ok(())
    }

    async fn poll(&mut self, ctx: &RunCtx) -> Result<(), TaskError> {
        if !ctx.is_running() && !self.state.teardown {
            if let Some(monitor) = &self.monitor {
                monitor.cancel();
            }
        }
        let Some(copy) = self.copy.as_mut() else {
            return Err(TaskError::failed(
                self.state.description.clone(),
                "copy was never started",
            ));
        };

        match tokio::time::timeout(ctx.config().runner.poll_timeout(), copy).await {
            Err(_) => {
                self.sample_progress();
                Ok(())
            }
            Ok(joined) => {
                self.copy = None;
                match joined {
                    Ok(Ok(report)) => self.conclude(report),
                    Ok(Err(SyncError::Cancelled)) => Err(TaskError::Cancelled {
                        task: self.state.description.clone(),
                    }),
                    Ok(Err(e)) => {
                        Err(TaskError::failed(self.state.description.clone(), e.to_string()))
                    }
                    Err(e) => Err(TaskError::failed(
                        self.state.description.clone(),
                        format!("copy task ended abnormally: {e}"),
                    )),
                }
            }
        }
    }

    async fn teardown(&mut self, _ctx: &RunCtx) -> Result<(), TaskError> {
        if let Some(copy) = self.copy.take() {
            if let Some(monitor) = &self.monitor {
                monitor.cancel();
            }
            // writers are released when the engine unwinds
            let _ = copy.await;
        }
        Ok(())
    }
}
