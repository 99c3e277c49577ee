//! Integration tests for the runner crate

use refurb_config::Config;
use refurb_errors::{Error, RunnerError, TaskError};
use refurb_events::{AppEvent, RecordingReporter, RunnerEvent, TaskEvent};
use refurb_platform::{EscalationSignal, PlatformCommand};
use refurb_runner::{
    CallbackTask, DeferredTask, PartitionTableTask, ProcessTask, RunCtx, Runner, SleepTask,
    StaticPlan, Task,
};
use refurb_types::{Disk, FsKind, PartitionTableKind, RunState, SharedDisk, PROGRESS_DONE};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> Config {
    let mut config = Config::default();
    config.runner.poll_timeout_ms = 20;
    config.runner.poll_interval_ms = 5;
    config.runner.report_interval_ms = 0;
    config
}

fn runner_with(config: Config) -> (Runner, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::new());
    let ctx = RunCtx::new(config, reporter.clone(), None);
    (Runner::new(ctx), reporter)
}

fn sh(script: &str) -> PlatformCommand {
    let mut cmd = PlatformCommand::new("sh");
    cmd.args(["-c", script]);
    cmd
}

fn ok_task(name: &str, estimate: f64) -> Box<dyn Task> {
    Box::new(CallbackTask::new(name, estimate, |_| Ok(())))
}

fn failing_task(name: &str) -> Box<dyn Task> {
    let owned = name.to_string();
    Box::new(CallbackTask::new(name, 1.0, move |_| {
        Err(TaskError::failed(owned.clone(), "boom"))
    }))
}

#[tokio::test]
async fn preflight_sums_estimates() {
    let (mut runner, reporter) = runner_with(fast_config());
    let mut plan = StaticPlan::new(
        "sum",
        vec![ok_task("a", 1.5), ok_task("b", 2.5), ok_task("c", 6.0)],
    );
    runner.prepare(&mut plan).unwrap();
    assert_eq!(runner.state(), RunState::Prepare);
    runner.preflight().unwrap();
    assert_eq!(runner.state(), RunState::Preflight);
    assert!((runner.run_estimate() - 10.0).abs() < 1e-9);

    let steps: Vec<usize> = runner.snapshots().iter().map(|t| t.step).collect();
    assert_eq!(steps, vec![1, 2, 3]);
    assert!(reporter.events().iter().any(|e| matches!(
        e,
        AppEvent::Runner(RunnerEvent::TasksPlanned { tasks, .. }) if tasks.len() == 3
    )));
}

#[tokio::test]
async fn transitions_out_of_order_are_rejected() {
    let (mut runner, _) = runner_with(fast_config());
    assert!(matches!(
        runner.preflight(),
        Err(RunnerError::InvalidTransition { .. })
    ));
    assert!(matches!(
        runner.run().await,
        Err(RunnerError::InvalidTransition { .. })
    ));

    let mut plan = StaticPlan::new("twice", vec![ok_task("a", 1.0)]);
    runner.prepare(&mut plan).unwrap();
    assert!(matches!(
        runner.prepare(&mut plan),
        Err(Error::Runner(RunnerError::InvalidTransition { .. }))
    ));
    assert!(matches!(
        runner.run().await,
        Err(RunnerError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn missing_estimate_fails_preflight() {
    let (mut runner, _) = runner_with(fast_config());
    let task = ProcessTask::new("no estimate", sh("true"));
    let mut plan = StaticPlan::new("missing", vec![Box::new(task) as Box<dyn Task>]);
    runner.prepare(&mut plan).unwrap();
    assert!(matches!(
        runner.preflight(),
        Err(RunnerError::MissingEstimate { task }) if task == "no estimate"
    ));
}

#[tokio::test]
async fn empty_runner_succeeds() {
    let (mut runner, reporter) = runner_with(fast_config());
    let state = runner
        .execute(&mut StaticPlan::new("empty", Vec::new()))
        .await
        .unwrap();
    assert_eq!(state, RunState::Success);
    assert!(runner.run_estimate().abs() < f64::EPSILON);
    assert!(reporter.events().iter().any(|e| matches!(
        e,
        AppEvent::Runner(RunnerEvent::Finished {
            state: RunState::Success,
            ..
        })
    )));
}

#[tokio::test]
async fn teardown_runs_after_failure() {
    let teardown_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&teardown_ran);
    let cleanup = CallbackTask::new("unmount", 1.0, move |_| {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    })
    .as_teardown();

    let (mut runner, reporter) = runner_with(fast_config());
    let mut plan = StaticPlan::new(
        "regression",
        vec![failing_task("mkfs"), ok_task("copy", 1.0), Box::new(cleanup)],
    );
    let state = runner.execute(&mut plan).await.unwrap();

    assert_eq!(state, RunState::Failed);
    assert!(teardown_ran.load(Ordering::SeqCst));
    let snaps = runner.snapshots();
    assert!(snaps[0].is_failed());
    assert!(snaps[0].message.contains("boom"));
    assert!(!snaps[1].is_started, "non-teardown task must be skipped");
    assert!(snaps[2].is_success());
    assert_eq!(runner.failed_tasks(), ["mkfs"]);
    assert!(reporter.events().iter().any(|e| matches!(
        e,
        AppEvent::Runner(RunnerEvent::Finished { failed_tasks, .. }) if failed_tasks == &["mkfs"]
    )));
}

#[tokio::test]
async fn failed_teardown_task_fails_the_run() {
    let (mut runner, _) = runner_with(fast_config());
    let broken_cleanup = CallbackTask::new("unmount", 1.0, |_| {
        Err(TaskError::failed("unmount", "busy"))
    })
    .as_teardown();
    let mut plan = StaticPlan::new(
        "cleanup",
        vec![ok_task("copy", 1.0), Box::new(broken_cleanup)],
    );
    assert_eq!(runner.execute(&mut plan).await.unwrap(), RunState::Failed);
}

#[tokio::test]
async fn done_tasks_report_only_final_progress() {
    let (mut runner, reporter) = runner_with(fast_config());
    let mut plan = StaticPlan::new(
        "mixed",
        vec![
            Box::new(ProcessTask::new("short", sh("sleep 0.2")).with_estimate(0.3)),
            failing_task("bad"),
            Box::new(SleepTask::new("settle", Duration::from_millis(50)).as_teardown()),
        ],
    );
    runner.execute(&mut plan).await.unwrap();

    let mut last: HashMap<String, u32> = HashMap::new();
    for event in reporter.events() {
        let AppEvent::Task(TaskEvent::Progress { tasks, .. }) = event else {
            continue;
        };
        for task in tasks {
            if task.is_done {
                assert!(task.progress >= PROGRESS_DONE, "{task:?}");
            } else {
                assert!(task.progress < PROGRESS_DONE, "{task:?}");
            }
            let previous = last.insert(task.description.clone(), task.progress);
            assert!(previous.unwrap_or(0) <= task.progress, "progress went backwards");
        }
    }
    assert!(last.contains_key("short"));
}

#[tokio::test]
async fn exit_codes_decide_the_outcome() {
    let (mut runner, _) = runner_with(fast_config());
    let mut plan = StaticPlan::new(
        "fsck",
        vec![
            Box::new(
                ProcessTask::new("fsck", sh("exit 1"))
                    .good_codes(&[0, 1])
                    .with_estimate(1.0),
            ),
            Box::new(
                ProcessTask::new("mkfs", sh("echo wrote; echo 'no such device' >&2; exit 3"))
                    .with_estimate(1.0),
            ),
        ],
    );
    assert_eq!(runner.execute(&mut plan).await.unwrap(), RunState::Failed);

    let snaps = runner.snapshots();
    assert!(snaps[0].is_success());
    assert!(snaps[1].is_failed());
    assert!(snaps[1].message.contains("status 3"), "{}", snaps[1].message);
    assert!(snaps[1].verdict.iter().any(|v| v.contains("no such device")));
    assert!(snaps[1].verdict.iter().any(|v| v.contains("wrote")));
}

#[tokio::test]
async fn missing_binary_is_a_setup_failure() {
    let (mut runner, _) = runner_with(fast_config());
    let task = ProcessTask::new("ghost", PlatformCommand::new("refurb-no-such-tool"))
        .with_estimate(1.0);
    let mut plan = StaticPlan::new("ghost", vec![Box::new(task) as Box<dyn Task>]);
    assert_eq!(runner.execute(&mut plan).await.unwrap(), RunState::Failed);
    let snap = &runner.snapshots()[0];
    assert!(snap.is_failed());
    assert!(snap.verdict[0].starts_with("setup failed"));
}

#[tokio::test]
async fn terminate_escalates_in_order() {
    let ctx = RunCtx::new(fast_config(), Arc::new(RecordingReporter::new()), None);
    let mut task = ProcessTask::new("stubborn", sh("trap '' INT TERM; exec sleep 30"))
        .with_estimate(30.0);
    task.setup(&ctx).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let sent: Vec<_> = (0..3).map(|_| task.terminate().unwrap()).collect();
    assert_eq!(
        sent,
        vec![
            Some(EscalationSignal::Interrupt),
            Some(EscalationSignal::Terminate),
            Some(EscalationSignal::Kill),
        ]
    );
    task.teardown(&ctx).await.unwrap();
}

#[tokio::test]
async fn cancel_interrupts_and_still_tears_down() {
    let cleaned = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cleaned);
    let (mut runner, _) = runner_with(fast_config());
    let mut plan = StaticPlan::new(
        "cancel",
        vec![
            Box::new(ProcessTask::new("long copy", sh("exec sleep 30")).with_estimate(30.0)),
            ok_task("verify", 1.0),
            Box::new(
                CallbackTask::new("unmount", 1.0, move |_| {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .as_teardown(),
            ),
        ],
    );
    runner.prepare(&mut plan).unwrap();
    runner.preflight().unwrap();

    let handle = runner.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.cancel();
    });
    let state = tokio::time::timeout(Duration::from_secs(10), runner.run())
        .await
        .expect("cancelled run must finish")
        .unwrap();

    assert_eq!(state, RunState::Failed);
    let snaps = runner.snapshots();
    assert!(snaps[0].is_failed());
    assert!(snaps[0].message.contains("cancelled"), "{}", snaps[0].message);
    assert!(!snaps[1].is_started);
    assert!(cleaned.load(Ordering::SeqCst));
}

#[tokio::test]
async fn overrunning_task_times_out() {
    let mut config = fast_config();
    config.runner.timeout_multiplier = 1.0;
    config.runner.timeout_grace_secs = 0.0;
    let (mut runner, _) = runner_with(config);
    let task = ProcessTask::new("hung", sh("exec sleep 30")).with_estimate(0.2);
    let mut plan = StaticPlan::new("timeout", vec![Box::new(task) as Box<dyn Task>]);

    let state = tokio::time::timeout(Duration::from_secs(10), runner.execute(&mut plan))
        .await
        .expect("timeout must end the run")
        .unwrap();
    assert_eq!(state, RunState::Failed);
    assert!(runner.snapshots()[0].message.contains("timed out"));
}

#[tokio::test]
async fn manual_stepping_drives_the_run() {
    let (mut runner, _) = runner_with(fast_config());
    let mut plan = StaticPlan::new("steps", vec![ok_task("a", 1.0), ok_task("b", 1.0)]);
    runner.prepare(&mut plan).unwrap();
    runner.preflight().unwrap();
    runner.begin().unwrap();

    let mut steps = 0;
    while runner.step().await.unwrap() {
        steps += 1;
        assert!(steps < 100);
    }
    assert_eq!(runner.state(), RunState::Success);
    assert!(!runner.step().await.unwrap());
    // each task: setup, one poll, teardown
    assert_eq!(steps, 6);
}

#[tokio::test]
async fn finished_tasks_contribute_actual_duration() {
    let (mut runner, _) = runner_with(fast_config());
    let mut plan = StaticPlan::new("actual", vec![ok_task("quick", 500.0)]);
    runner.execute(&mut plan).await.unwrap();
    assert!(runner.current_estimate() < 5.0);
}

#[tokio::test]
async fn deferred_task_sees_what_earlier_tasks_recorded() {
    let (mut runner, _) = runner_with(fast_config());
    let found = Arc::new(AtomicBool::new(false));
    let writer = Arc::clone(&found);
    let record = CallbackTask::new("record", 1.0, move |_| {
        writer.store(true, Ordering::SeqCst);
        Ok(())
    });
    let reader = Arc::clone(&found);
    let deferred = DeferredTask::new("pick command", 4.0, move |_ctx: &RunCtx| {
        let script = if reader.load(Ordering::SeqCst) { "exit 0" } else { "exit 3" };
        Ok(Box::new(ProcessTask::new("picked command", sh(script))) as Box<dyn Task>)
    });
    let mut plan = StaticPlan::new("deferred", vec![Box::new(record) as Box<dyn Task>, Box::new(deferred)]);

    runner.prepare(&mut plan).unwrap();
    runner.preflight().unwrap();
    assert!((runner.run_estimate() - 5.0).abs() < 1e-9);
    let state = runner.run().await.unwrap();

    assert_eq!(state, RunState::Success);
    let snapshot = &runner.snapshots()[1];
    assert_eq!(snapshot.description, "picked command");
    assert_eq!(snapshot.step, 2);
    assert_eq!(snapshot.progress, PROGRESS_DONE);
}

#[tokio::test]
async fn deferred_build_failure_fails_setup() {
    let (mut runner, _) = runner_with(fast_config());
    let deferred = DeferredTask::new("unbuildable", 1.0, |_ctx: &RunCtx| {
        Err(TaskError::setup("unbuildable", "nothing to run"))
    });
    let mut plan = StaticPlan::new("deferred", vec![Box::new(deferred) as Box<dyn Task>]);
    let state = runner.execute(&mut plan).await.unwrap();
    assert_eq!(state, RunState::Failed);
    assert!(runner.snapshots()[0].verdict[0].contains("nothing to run"));
}

/// Write an executable shell script standing in for a disk tool
fn fake_tool(dir: &Path, name: &str, body: &str) -> String {
    let path: PathBuf = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

fn table_task(disk: &SharedDisk, estimate: f64) -> Box<dyn Task> {
    let mut task = PartitionTableTask::new(Arc::clone(disk));
    task.state_mut().set_estimate(estimate);
    Box::new(task)
}

#[tokio::test]
async fn partition_table_is_read_and_identified() {
    let tools = tempfile::tempdir().unwrap();
    let mut config = fast_config();
    config.tools.sfdisk = fake_tool(
        tools.path(),
        "sfdisk",
        r#"cat <<'EOF'
{"partitiontable": {"label": "dos", "device": "/dev/sdx",
 "partitions": [{"node": "/dev/sdx1", "start": 2048, "size": 4096, "type": "83"}]}}
EOF"#,
    );
    config.tools.blkid = fake_tool(tools.path(), "blkid", "echo TYPE=ext4; echo UUID=1234-abcd");

    let disk = Disk::new("/dev/sdx", 8 << 20).into_shared();
    let (mut runner, _) = runner_with(config);
    let mut plan = StaticPlan::new("read-table", vec![table_task(&disk, 3.0)]);
    assert_eq!(runner.execute(&mut plan).await.unwrap(), RunState::Success);

    let disk = disk.lock().unwrap();
    assert_eq!(disk.table, PartitionTableKind::Dos);
    assert_eq!(disk.partitions.len(), 1);
    assert_eq!(disk.partitions[0].fs_kind, Some(FsKind::Ext4));
    assert_eq!(disk.partitions[0].uuid.as_deref(), Some("1234-abcd"));
}

#[tokio::test]
async fn hung_partition_table_read_times_out() {
    let tools = tempfile::tempdir().unwrap();
    let mut config = fast_config();
    config.runner.timeout_multiplier = 1.0;
    config.runner.timeout_grace_secs = 0.0;
    config.tools.sfdisk = fake_tool(tools.path(), "sfdisk", "exec sleep 30");

    let disk = Disk::new("/dev/sdx", 8 << 20).into_shared();
    let (mut runner, _) = runner_with(config);
    let mut plan = StaticPlan::new("read-table", vec![table_task(&disk, 0.3)]);
    let state = tokio::time::timeout(Duration::from_secs(10), runner.execute(&mut plan))
        .await
        .expect("timeout must end the run")
        .unwrap();

    assert_eq!(state, RunState::Failed);
    let snap = &runner.snapshots()[0];
    assert!(snap.is_failed());
    assert!(snap.message.contains("timed out"), "{}", snap.message);
}

#[tokio::test]
async fn cancel_escalates_against_a_stubborn_table_read() {
    let tools = tempfile::tempdir().unwrap();
    let mut config = fast_config();
    config.tools.sfdisk = fake_tool(tools.path(), "sfdisk", "trap '' INT TERM; sleep 30");

    let disk = Disk::new("/dev/sdx", 8 << 20).into_shared();
    let (mut runner, _) = runner_with(config);
    let mut plan = StaticPlan::new("read-table", vec![table_task(&disk, 30.0)]);
    runner.prepare(&mut plan).unwrap();
    runner.preflight().unwrap();

    let handle = runner.handle();
    tokio::spawn(async move {
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(300)).await;
            handle.cancel();
        }
    });
    let state = tokio::time::timeout(Duration::from_secs(10), runner.run())
        .await
        .expect("cancelled table read must finish")
        .unwrap();

    assert_eq!(state, RunState::Failed);
    let snap = &runner.snapshots()[0];
    assert!(snap.is_failed());
    assert!(snap.message.contains("cancelled"), "{}", snap.message);
}
