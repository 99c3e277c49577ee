//! Integration tests for the sync crate

use refurb_config::{Config, SyncConfig};
use refurb_errors::SyncError;
use refurb_events::{AppEvent, NullReporter, RecordingReporter, SharedReporter, SyncEvent};
use refurb_runner::{RunCtx, Runner, StaticPlan, Task};
use refurb_sync::{
    CatalogSync, DestinationSpec, DestinationWriter, FanoutCopyTask, MemoryWriter, SyncEngine,
    SyncOutcome,
};
use refurb_types::{DestinationStatus, RunState};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use uuid::Uuid;

fn small_chunks() -> SyncConfig {
    SyncConfig {
        chunk_size: 1024,
        channel_depth: 2,
        status_interval_ms: 10,
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.runner.poll_timeout_ms = 20;
    config.runner.poll_interval_ms = 5;
    config.runner.report_interval_ms = 0;
    config.sync = small_chunks();
    config
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn null_reporter() -> SharedReporter {
    Arc::new(NullReporter)
}

#[tokio::test]
async fn failing_destination_does_not_stop_the_others() {
    let source = pattern(10 * 1024);
    let first = MemoryWriter::new("one");
    let second = MemoryWriter::new("two").failing_after(4096);
    let third = MemoryWriter::new("three");
    let buffers = [first.buffer(), second.buffer(), third.buffer()];

    let mut engine = SyncEngine::new(&small_chunks(), source.len() as u64);
    engine.add_destination("one", Box::new(first));
    engine.add_destination("two", Box::new(second));
    engine.add_destination("three", Box::new(third));

    let reporter = Arc::new(RecordingReporter::new());
    let report = engine
        .run("pattern", &source[..], reporter.clone(), Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(report.outcome, SyncOutcome::CompletedWithFailures);
    assert_eq!(report.bytes_read, source.len() as u64);
    assert_eq!(report.failed(), 1);

    let copied = |i: usize| buffers[i].lock().unwrap_or_else(PoisonError::into_inner).clone();
    assert_eq!(copied(0), source);
    assert_eq!(copied(2), source);
    assert!(copied(1).len() < source.len());

    let by_key = |key: &str| {
        report
            .destinations
            .iter()
            .find(|d| d.key == key)
            .unwrap()
            .clone()
    };
    assert_eq!(by_key("one").status, DestinationStatus::Success);
    assert_eq!(by_key("one").completed_size, source.len() as u64);
    assert_eq!(by_key("three").status, DestinationStatus::Success);
    let two = by_key("two");
    assert_eq!(two.status, DestinationStatus::Failed);
    assert!(!two.alive);
    assert!(two.completed_size < source.len() as u64);
    assert!(two.error.unwrap().contains("injected"));

    assert!(matches!(
        report.clone().into_result(),
        Err(SyncError::PartialFailure { failed: 1, total: 3 })
    ));
    assert!(reporter
        .events()
        .iter()
        .any(|e| matches!(e, AppEvent::Sync(SyncEvent::Status { destinations, .. }) if destinations.len() == 3)));
}

/// Accepts nothing until the gate opens
struct GatedWriter {
    gate: tokio::sync::watch::Receiver<bool>,
    written: Arc<std::sync::atomic::AtomicUsize>,
}

#[async_trait::async_trait]
impl DestinationWriter for GatedWriter {
    fn target(&self) -> String {
        "gated".to_string()
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SyncError> {
        let target = self.target();
        self.gate
            .wait_for(|open| *open)
            .await
            .map_err(|e| SyncError::DestinationWrite {
                destination: target,
                message: e.to_string(),
            })?;
        self.written
            .fetch_add(chunk.len(), std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SyncError> {
        Ok(())
    }
}

#[tokio::test]
async fn slow_destination_holds_the_reader_within_channel_depth() {
    let config = small_chunks();
    let source = pattern(32 * config.chunk_size);
    let (open, gate) = tokio::sync::watch::channel(false);
    let written = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let fast = MemoryWriter::new("fast");
    let fast_buffer = fast.buffer();

    let mut engine = SyncEngine::new(&config, source.len() as u64);
    engine.add_destination("fast", Box::new(fast));
    engine.add_destination(
        "slow",
        Box::new(GatedWriter {
            gate,
            written: Arc::clone(&written),
        }),
    );
    let copy = tokio::spawn(engine.run(
        "pattern",
        std::io::Cursor::new(source.clone()),
        null_reporter(),
        Uuid::new_v4(),
    ));

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    // one chunk in the slow writer, a full channel, one chunk waiting to be sent
    let ahead = fast_buffer.lock().unwrap().len();
    assert!(ahead <= (config.channel_depth + 2) * config.chunk_size, "{ahead}");
    assert!(ahead < source.len());

    open.send(true).unwrap();
    let report = copy.await.unwrap().unwrap();
    assert_eq!(report.outcome, SyncOutcome::Completed);
    assert_eq!(*fast_buffer.lock().unwrap(), source);
    assert_eq!(written.load(std::sync::atomic::Ordering::SeqCst), source.len());
}

#[tokio::test]
async fn every_destination_failing_fails_the_copy() {
    let source = pattern(8 * 1024);
    let mut engine = SyncEngine::new(&small_chunks(), source.len() as u64);
    engine.add_destination("a", Box::new(MemoryWriter::new("a").failing_after(0)));
    engine.add_failed_destination("b", "/dev/sdz", "no such device");

    let report = engine
        .run("pattern", &source[..], null_reporter(), Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(report.outcome, SyncOutcome::Failed);
    assert!(matches!(
        report.into_result(),
        Err(SyncError::AllDestinationsFailed { total: 2 })
    ));
}

#[tokio::test]
async fn copy_without_destinations_is_rejected() {
    let engine = SyncEngine::new(&small_chunks(), 0);
    assert!(engine.is_empty());
    let result = engine
        .run("empty", &b""[..], null_reporter(), Uuid::new_v4())
        .await;
    assert!(matches!(result, Err(SyncError::NoDestinations)));
}

#[tokio::test]
async fn cancelled_copy_reports_cancellation() {
    let source = pattern(64 * 1024);
    let mut engine = SyncEngine::new(&small_chunks(), source.len() as u64);
    engine.add_destination("a", Box::new(MemoryWriter::new("a")));
    engine.monitor().cancel();
    let result = engine
        .run("pattern", &source[..], null_reporter(), Uuid::new_v4())
        .await;
    assert!(matches!(result, Err(SyncError::Cancelled)));
}

#[tokio::test]
async fn empty_source_completes() {
    let mut engine = SyncEngine::new(&small_chunks(), 0);
    let writer = MemoryWriter::new("a");
    let buffer = writer.buffer();
    engine.add_destination("a", Box::new(writer));
    let report = engine
        .run("empty", &b""[..], null_reporter(), Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(report.outcome, SyncOutcome::Completed);
    assert_eq!(report.bytes_read, 0);
    assert!(buffer.lock().unwrap().is_empty());
}

#[tokio::test]
async fn fanout_task_copies_files_inside_a_runner() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("disk.img");
    let source = pattern(50 * 1024 + 17);
    std::fs::write(&source_path, &source).unwrap();
    let targets: Vec<PathBuf> = (1..=3).map(|i| dir.path().join(format!("copy{i}.img"))).collect();

    let task = FanoutCopyTask::to_paths(&source_path, &targets, 0);
    let reporter = Arc::new(RecordingReporter::new());
    let mut runner = Runner::new(RunCtx::new(fast_config(), reporter.clone(), None));
    let mut plan = StaticPlan::new("fanout", vec![Box::new(task) as Box<dyn Task>]);

    let state = runner.execute(&mut plan).await.unwrap();
    assert_eq!(state, RunState::Success);
    for target in &targets {
        assert_eq!(std::fs::read(target).unwrap(), source);
    }
    assert!(reporter.events().iter().any(|e| matches!(e, AppEvent::Sync(_))));
}

#[tokio::test]
async fn dead_destination_does_not_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let first_path = dir.path().join("a.img");
    let second_path = dir.path().join("b.img");
    let first = pattern(16 * 1024);
    let second = pattern(9 * 1024 + 5);
    std::fs::write(&first_path, &first).unwrap();
    std::fs::write(&second_path, &second).unwrap();

    let survivor = MemoryWriter::new("one");
    let survivor_buffer = survivor.buffer();
    let survivor_dir = dir.path().join("survivor");
    std::fs::create_dir(&survivor_dir).unwrap();
    let first_copy = FanoutCopyTask::new(
        &first_path,
        vec![
            ("one".to_string(), DestinationSpec::Writer(Box::new(survivor))),
            (
                "two".to_string(),
                DestinationSpec::Writer(Box::new(MemoryWriter::new("two").failing_after(4096))),
            ),
            (
                "missing".to_string(),
                DestinationSpec::Path(dir.path().join("no/such/dir/copy.img")),
            ),
        ],
        first.len() as u64,
    );
    let second_copy = FanoutCopyTask::to_paths(&second_path, &[survivor_dir.join("b.img")], 0);

    let mut runner = Runner::new(RunCtx::new(fast_config(), null_reporter(), None));
    let mut plan = StaticPlan::new(
        "fanout",
        vec![Box::new(first_copy) as Box<dyn Task>, Box::new(second_copy)],
    );

    let state = runner.execute(&mut plan).await.unwrap();
    assert_eq!(state, RunState::Success);
    assert_eq!(*survivor_buffer.lock().unwrap(), first);
    assert_eq!(std::fs::read(survivor_dir.join("b.img")).unwrap(), second);

    let snapshots = runner.snapshots();
    assert!(snapshots.iter().all(|s| s.is_success()));
    let verdict = &snapshots[0].verdict;
    assert_eq!(verdict.len(), 3);
    assert!(verdict.iter().any(|v| v.starts_with("one") && v.contains("bytes written")));
    assert!(verdict.iter().any(|v| v.starts_with("two") && v.contains("injected")));
    assert!(verdict.iter().any(|v| v.starts_with("missing") && v.contains("failed")));
    assert!(snapshots[0].message.contains("completed with failures"));
}

#[tokio::test]
async fn fanout_task_fails_when_every_destination_dies() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("disk.img");
    std::fs::write(&source_path, pattern(8 * 1024)).unwrap();

    let task = FanoutCopyTask::new(
        &source_path,
        vec![(
            "only".to_string(),
            DestinationSpec::Writer(Box::new(MemoryWriter::new("only").failing_after(0))),
        )],
        0,
    );
    let mut runner = Runner::new(RunCtx::new(fast_config(), null_reporter(), None));
    let mut plan = StaticPlan::new("fanout", vec![Box::new(task) as Box<dyn Task>]);

    assert_eq!(runner.execute(&mut plan).await.unwrap(), RunState::Failed);
    let snapshot = &runner.snapshots()[0];
    assert!(snapshot.is_failed());
    assert!(snapshot.verdict.iter().any(|v| v.starts_with("only")));
}

#[tokio::test]
async fn catalog_sync_into_directories() {
    if std::process::Command::new("rsync").arg("--version").output().is_err() {
        return;
    }
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("win10.img"), pattern(20 * 1024)).unwrap();
    std::fs::create_dir_all(source.path().join("meta")).unwrap();
    std::fs::write(source.path().join("meta/win10.json"), b"{\"id\":\"win10\"}").unwrap();

    let dest_a = tempfile::tempdir().unwrap();
    let dest_b = tempfile::tempdir().unwrap();
    let mut plan = CatalogSync::new(
        source.path(),
        vec![dest_a.path().to_path_buf(), dest_b.path().to_path_buf()],
    );
    let mut runner = Runner::new(RunCtx::new(fast_config(), null_reporter(), None));
    let state = runner.execute(&mut plan).await.unwrap();

    assert_eq!(state, RunState::Success);
    for dest in [dest_a.path(), dest_b.path()] {
        assert_eq!(std::fs::read(dest.join("win10.img")).unwrap().len(), 20 * 1024);
        assert!(dest.join("meta/win10.json").exists());
    }
}

#[tokio::test]
async fn catalog_sync_needs_destinations() {
    let source = tempfile::tempdir().unwrap();
    let mut plan = CatalogSync::new(source.path(), Vec::new());
    let mut runner = Runner::new(RunCtx::new(fast_config(), null_reporter(), None));
    assert!(runner.execute(&mut plan).await.is_err());
    assert_eq!(runner.state(), RunState::Failed);
}
