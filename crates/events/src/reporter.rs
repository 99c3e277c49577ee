//! The progress/log boundary between the engine and its front ends

use std::sync::{Arc, Mutex};

use refurb_types::{RunState, ScoreboardSnapshot, TaskSnapshot};
use uuid::Uuid;

use crate::{
    AppEvent, EventEmitter, EventMeta, EventSender, GeneralEvent, RunnerEvent, SyncEvent,
    TaskEvent,
};

/// Reporter shared between a runner, its tasks and background status loops
pub type SharedReporter = Arc<dyn Reporter>;

/// Sink for progress and log events produced by runners and tasks.
///
/// Calls must not block; implementations queue or drop.
pub trait Reporter: Send + Sync {
    /// Full task list and aggregate estimate, sent once after preflight
    fn report_tasks(&self, run_id: Uuid, estimate: f64, tasks: &[TaskSnapshot]);

    fn report_task_progress(
        &self,
        run_id: Uuid,
        estimate: f64,
        elapsed: f64,
        task: &TaskSnapshot,
        tasks: &[TaskSnapshot],
    );

    fn report_task_success(&self, run_id: Uuid, elapsed: f64, task: &TaskSnapshot);

    fn report_task_failure(&self, run_id: Uuid, elapsed: f64, task: &TaskSnapshot);

    fn report_run_progress(
        &self,
        run_id: Uuid,
        state: RunState,
        step: usize,
        tasks: &[TaskSnapshot],
        estimate: f64,
        elapsed: f64,
    );

    fn log(&self, run_id: Uuid, message: &str);

    /// Fan-out scoreboards; ignored by reporters that do not render them
    fn report_sync_status(&self, _run_id: Uuid, _destinations: &[ScoreboardSnapshot]) {}

    /// Terminal state of a run
    fn report_run_finished(
        &self,
        _run_id: Uuid,
        _state: RunState,
        _elapsed: f64,
        _failed_tasks: &[String],
    ) {
    }
}

/// Reporter that turns every call into an [`AppEvent`] on a channel
#[derive(Clone)]
pub struct EventReporter {
    tx: EventSender,
}

impl EventReporter {
    #[must_use]
    pub fn new(tx: EventSender) -> Self {
        Self { tx }
    }

    fn send(&self, run_id: Uuid, event: AppEvent) {
        let meta = EventMeta::for_event(&event).with_run_id(run_id);
        self.emit_with_meta(meta, event);
    }
}

impl EventEmitter for EventReporter {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(&self.tx)
    }
}

impl Reporter for EventReporter {
    fn report_tasks(&self, run_id: Uuid, estimate: f64, tasks: &[TaskSnapshot]) {
        self.send(
            run_id,
            AppEvent::Runner(RunnerEvent::TasksPlanned {
                run_id,
                estimate,
                tasks: tasks.to_vec(),
            }),
        );
    }

    fn report_task_progress(
        &self,
        run_id: Uuid,
        estimate: f64,
        elapsed: f64,
        task: &TaskSnapshot,
        tasks: &[TaskSnapshot],
    ) {
        self.send(
            run_id,
            AppEvent::Task(TaskEvent::Progress {
                run_id,
                estimate,
                elapsed,
                task: task.clone(),
                tasks: tasks.to_vec(),
            }),
        );
    }

    fn report_task_success(&self, run_id: Uuid, elapsed: f64, task: &TaskSnapshot) {
        self.send(
            run_id,
            AppEvent::Task(TaskEvent::Succeeded {
                run_id,
                elapsed,
                task: task.clone(),
            }),
        );
    }

    fn report_task_failure(&self, run_id: Uuid, elapsed: f64, task: &TaskSnapshot) {
        self.send(
            run_id,
            AppEvent::Task(TaskEvent::Failed {
                run_id,
                elapsed,
                task: task.clone(),
            }),
        );
    }

    fn report_run_progress(
        &self,
        run_id: Uuid,
        state: RunState,
        step: usize,
        tasks: &[TaskSnapshot],
        estimate: f64,
        elapsed: f64,
    ) {
        self.send(
            run_id,
            AppEvent::Runner(RunnerEvent::Progress {
                run_id,
                state,
                step,
                tasks: tasks.to_vec(),
                estimate,
                elapsed,
            }),
        );
    }

    fn log(&self, run_id: Uuid, message: &str) {
        self.send(run_id, AppEvent::General(GeneralEvent::log(message)));
    }

    fn report_sync_status(&self, run_id: Uuid, destinations: &[ScoreboardSnapshot]) {
        self.send(
            run_id,
            AppEvent::Sync(SyncEvent::Status {
                run_id,
                destinations: destinations.to_vec(),
            }),
        );
    }

    fn report_run_finished(
        &self,
        run_id: Uuid,
        state: RunState,
        elapsed: f64,
        failed_tasks: &[String],
    ) {
        self.send(
            run_id,
            AppEvent::Runner(RunnerEvent::Finished {
                run_id,
                state,
                elapsed,
                failed_tasks: failed_tasks.to_vec(),
            }),
        );
    }
}

/// Reporter that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report_tasks(&self, _run_id: Uuid, _estimate: f64, _tasks: &[TaskSnapshot]) {}

    fn report_task_progress(
        &self,
        _run_id: Uuid,
        _estimate: f64,
        _elapsed: f64,
        _task: &TaskSnapshot,
        _tasks: &[TaskSnapshot],
    ) {
    }

    fn report_task_success(&self, _run_id: Uuid, _elapsed: f64, _task: &TaskSnapshot) {}

    fn report_task_failure(&self, _run_id: Uuid, _elapsed: f64, _task: &TaskSnapshot) {}

    fn report_run_progress(
        &self,
        _run_id: Uuid,
        _state: RunState,
        _step: usize,
        _tasks: &[TaskSnapshot],
        _estimate: f64,
        _elapsed: f64,
    ) {
    }

    fn log(&self, _run_id: Uuid, _message: &str) {}
}

/// Reporter that keeps every event in memory, for tests and summaries
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<AppEvent>>,
}

impl RecordingReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far
    #[must_use]
    pub fn events(&self) -> Vec<AppEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Log lines recorded via [`Reporter::log`]
    #[must_use]
    pub fn logs(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::General(GeneralEvent::Log { message }) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: AppEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}

impl Reporter for RecordingReporter {
    fn report_tasks(&self, run_id: Uuid, estimate: f64, tasks: &[TaskSnapshot]) {
        self.push(AppEvent::Runner(RunnerEvent::TasksPlanned {
            run_id,
            estimate,
            tasks: tasks.to_vec(),
        }));
    }

    fn report_task_progress(
        &self,
        run_id: Uuid,
        estimate: f64,
        elapsed: f64,
        task: &TaskSnapshot,
        tasks: &[TaskSnapshot],
    ) {
        self.push(AppEvent::Task(TaskEvent::Progress {
            run_id,
            estimate,
            elapsed,
            task: task.clone(),
            tasks: tasks.to_vec(),
        }));
    }

    fn report_task_success(&self, run_id: Uuid, elapsed: f64, task: &TaskSnapshot) {
        self.push(AppEvent::Task(TaskEvent::Succeeded {
            run_id,
            elapsed,
            task: task.clone(),
        }));
    }

    fn report_task_failure(&self, run_id: Uuid, elapsed: f64, task: &TaskSnapshot) {
        self.push(AppEvent::Task(TaskEvent::Failed {
            run_id,
            elapsed,
            task: task.clone(),
        }));
    }

    fn report_run_progress(
        &self,
        run_id: Uuid,
        state: RunState,
        step: usize,
        tasks: &[TaskSnapshot],
        estimate: f64,
        elapsed: f64,
    ) {
        self.push(AppEvent::Runner(RunnerEvent::Progress {
            run_id,
            state,
            step,
            tasks: tasks.to_vec(),
            estimate,
            elapsed,
        }));
    }

    fn log(&self, _run_id: Uuid, message: &str) {
        self.push(AppEvent::General(GeneralEvent::log(message)));
    }

    fn report_sync_status(&self, run_id: Uuid, destinations: &[ScoreboardSnapshot]) {
        self.push(AppEvent::Sync(SyncEvent::Status {
            run_id,
            destinations: destinations.to_vec(),
        }));
    }

    fn report_run_finished(
        &self,
        run_id: Uuid,
        state: RunState,
        elapsed: f64,
        failed_tasks: &[String],
    ) {
        self.push(AppEvent::Runner(RunnerEvent::Finished {
            run_id,
            state,
            elapsed,
            failed_tasks: failed_tasks.to_vec(),
        }));
    }
}
