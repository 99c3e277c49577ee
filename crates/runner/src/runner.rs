//! The runner state machine

use refurb_errors::{Error, RunnerError};
use refurb_types::{RunState, TaskSnapshot};
use std::time::Instant;
use tokio::time::MissedTickBehavior;

use crate::context::{RunCtx, RunnerHandle};
use crate::task::Task;

/// Builds the ordered task list of one operation
pub trait RunnerPlan: Send {
    /// Short operation name used in logs
    fn name(&self) -> &str;

    /// Produce the tasks, in execution order
    ///
    /// # Errors
    ///
    /// Returns an error when the operation cannot be planned, e.g. the disk
    /// is too small for the requested layout.
    fn prepare(&mut self, ctx: &RunCtx) -> Result<Vec<Box<dyn Task>>, Error>;
}

/// A plan whose tasks were built up front
pub struct StaticPlan {
    name: String,
    tasks: Vec<Box<dyn Task>>,
}

impl StaticPlan {
    #[must_use]
    pub fn new(name: impl Into<String>, tasks: Vec<Box<dyn Task>>) -> Self {
        Self {
            name: name.into(),
            tasks,
        }
    }
}

impl RunnerPlan for StaticPlan {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _ctx: &RunCtx) -> Result<Vec<Box<dyn Task>>, Error> {
        Ok(std::mem::take(&mut self.tasks))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Polling,
    TearingDown,
}

/// Sequences tasks through `Initial -> Prepare -> Preflight -> Running` and
/// on to `Success` or `Failed`.
///
/// Tasks run strictly in order. Once the run stops being `Running` (a task
/// failed, or cancellation was requested) only teardown-marked tasks still
/// execute.
pub struct Runner {
    ctx: RunCtx,
    tasks: Vec<Box<dyn Task>>,
    run_estimate: f64,
    started: Option<Instant>,
    current: usize,
    phase: Phase,
    last_report: Option<Instant>,
    failed_tasks: Vec<String>,
    finished: bool,
}

impl Runner {
    #[must_use]
    pub fn new(ctx: RunCtx) -> Self {
        Self {
            ctx,
            tasks: Vec::new(),
            run_estimate: 0.0,
            started: None,
            current: 0,
            phase: Phase::Pending,
            last_report: None,
            failed_tasks: Vec::new(),
            finished: false,
        }
    }

    #[must_use]
    pub fn ctx(&self) -> &RunCtx {
        &self.ctx
    }

    #[must_use]
    pub fn handle(&self) -> RunnerHandle {
        self.ctx.handle()
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.ctx.state()
    }

    #[must_use]
    pub fn tasks(&self) -> &[Box<dyn Task>] {
        &self.tasks
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(|t| t.snapshot()).collect()
    }

    /// Sum of task estimates computed at preflight
    #[must_use]
    pub fn run_estimate(&self) -> f64 {
        self.run_estimate
    }

    /// Seconds since `run` started
    #[must_use]
    pub fn run_time(&self) -> f64 {
        self.started.map_or(0.0, |s| s.elapsed().as_secs_f64())
    }

    /// 1-based step currently executing
    #[must_use]
    pub fn current_step(&self) -> usize {
        (self.current + 1).min(self.tasks.len())
    }

    /// Descriptions of the tasks that failed
    #[must_use]
    pub fn failed_tasks(&self) -> &[String] {
        &self.failed_tasks
    }

    fn expect_state(&self, expected: RunState, to: RunState) -> Result<(), RunnerError> {
        let current = self.ctx.state();
        if current == expected {
            Ok(())
        } else {
            Err(RunnerError::InvalidTransition {
                from: current.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Collect the plan's tasks. Only legal from `Initial`.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::InvalidTransition` in any other state, or the
    /// plan's own error, which fails the run.
    pub fn prepare(&mut self, plan: &mut dyn RunnerPlan) -> Result<(), Error> {
        self.expect_state(RunState::Initial, RunState::Prepare)?;
        tracing::debug!(run_id = %self.ctx.run_id(), plan = plan.name(), "preparing");
        match plan.prepare(&self.ctx) {
            Ok(tasks) => {
                self.tasks.extend(tasks);
                self.ctx.set_state(RunState::Prepare);
                Ok(())
            }
            Err(e) => {
                self.ctx.set_state(RunState::Failed);
                self.ctx.log(&format!("{} could not be planned: {e}", plan.name()));
                Err(e)
            }
        }
    }

    /// Number the tasks, let each see its siblings and sum the estimates.
    /// Only legal from `Prepare`.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::InvalidTransition` in any other state and
    /// `RunnerError::MissingEstimate` if a task has no estimate.
    pub fn preflight(&mut self) -> Result<(), RunnerError> {
        self.expect_state(RunState::Prepare, RunState::Preflight)?;

        for (i, task) in self.tasks.iter_mut().enumerate() {
            task.state_mut().step = i + 1;
        }
        let siblings = self.snapshots();
        for (i, task) in self.tasks.iter_mut().enumerate() {
            task.preflight(i, &siblings);
        }

        let mut total = 0.0;
        for task in &self.tasks {
            let Some(estimate) = task.estimate_time() else {
                return Err(RunnerError::MissingEstimate {
                    task: task.state().description.clone(),
                });
            };
            total += estimate;
        }
        self.run_estimate = total;

        self.ctx
            .reporter()
            .report_tasks(self.ctx.run_id(), total, &self.snapshots());
        self.ctx.set_state(RunState::Preflight);
        tracing::debug!(run_id = %self.ctx.run_id(), tasks = self.tasks.len(), estimate = total, "preflight done");
        Ok(())
    }

    /// Execute every task. Only legal from `Preflight`.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::InvalidTransition` if called in another state.
    /// Task failures are not errors here; they show in the returned state.
    pub async fn run(&mut self) -> Result<RunState, RunnerError> {
        self.begin()?;
        let mut ticker = tokio::time::interval(self.ctx.config().runner.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while self.step().await? {
            if self.phase == Phase::Polling {
                ticker.tick().await;
            }
        }
        Ok(self.state())
    }

    /// Move from `Preflight` to `Running` without driving any task; use
    /// [`Runner::step`] afterwards to advance by hand.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::InvalidTransition` unless in `Preflight`.
    pub fn begin(&mut self) -> Result<(), RunnerError> {
        self.expect_state(RunState::Preflight, RunState::Running)?;
        // a cancel that arrived during prepare or preflight still counts
        if self.ctx.cancel_requests() > 0 {
            self.ctx.set_state(RunState::Cancelled);
        } else {
            self.ctx.set_state(RunState::Running);
        }
        self.started = Some(Instant::now());
        self.ctx.log(&format!(
            "running {} tasks, estimated {:.0}s",
            self.tasks.len(),
            self.run_estimate
        ));
        Ok(())
    }

    /// Advance the run by one unit of work: start a task, poll it once, or
    /// tear it down. Returns `false` once the run has finished.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::InvalidTransition` if the run was never begun.
    pub async fn step(&mut self) -> Result<bool, RunnerError> {
        if self.finished {
            return Ok(false);
        }
        if self.started.is_none() {
            return Err(RunnerError::InvalidTransition {
                from: self.state().to_string(),
                to: RunState::Running.to_string(),
            });
        }

        loop {
            if self.current >= self.tasks.len() {
                self.finish();
                return Ok(false);
            }
            match self.phase {
                Phase::Pending => {
                    let task = &self.tasks[self.current];
                    if self.ctx.state() != RunState::Running && !task.state().teardown {
                        tracing::debug!(task = %task.state().description, "skipping");
                        self.current += 1;
                        continue;
                    }
                    self.start_current().await;
                }
                Phase::Polling => self.poll_current().await,
                Phase::TearingDown => {
                    self.teardown_current().await;
                    self.current += 1;
                    self.phase = Phase::Pending;
                }
            }
            return Ok(true);
        }
    }

    async fn start_current(&mut self) {
        let ctx = self.ctx.clone();
        let task = &mut self.tasks[self.current];
        task.state_mut().start();
        tracing::debug!(step = task.state().step, task = %task.state().description, "setup");

        if let Err(e) = task.setup(&ctx).await {
            tracing::error!(task = %task.state().description, "setup failed: {e}");
            task.state_mut().setup_failed(e.to_string());
        }
        self.phase = if task.state().is_done() {
            Phase::TearingDown
        } else {
            Phase::Polling
        };
        self.maybe_report(true);
    }

    async fn poll_current(&mut self) {
        let ctx = self.ctx.clone();
        let task = &mut self.tasks[self.current];
        if let Err(e) = task.poll(&ctx).await {
            tracing::error!(task = %task.state().description, "{e}");
            task.state_mut().fail(e.to_string());
        }
        if task.state().is_done() {
            self.phase = Phase::TearingDown;
        }
        self.maybe_report(false);
    }

    async fn teardown_current(&mut self) {
        let ctx = self.ctx.clone();
        let task = &mut self.tasks[self.current];
        if let Err(e) = task.teardown(&ctx).await {
            tracing::error!(task = %task.state().description, "teardown failed: {e}");
            if task.state().is_failed() {
                task.state_mut().append_verdict(format!("teardown: {e}"));
            } else {
                task.state_mut().fail(format!("teardown: {e}"));
            }
        }
        // a task whose poll loop was cut short still has to end done
        if !task.state().is_done() {
            task.state_mut().fail("task stopped before completion");
        }
        task.state_mut().finalize();

        let snapshot = task.snapshot();
        let elapsed = self.run_time();
        let run_id = self.ctx.run_id();
        if snapshot.is_failed() {
            self.failed_tasks.push(snapshot.description.clone());
            self.ctx
                .log(&format!("{} failed: {}", snapshot.description, snapshot.message));
            self.ctx
                .reporter()
                .report_task_failure(run_id, elapsed, &snapshot);
            if self.ctx.state() == RunState::Running {
                self.ctx.set_state(RunState::Failed);
            }
        } else {
            self.ctx
                .reporter()
                .report_task_success(run_id, elapsed, &snapshot);
        }
        self.maybe_report(true);
    }

    /// Current aggregate estimate: finished tasks contribute their actual
    /// duration, the rest their latest estimate
    #[must_use]
    pub fn current_estimate(&self) -> f64 {
        self.tasks
            .iter()
            .filter_map(|t| t.estimate_time())
            .sum()
    }

    fn maybe_report(&mut self, force: bool) {
        let now = Instant::now();
        let interval = self.ctx.config().runner.report_interval();
        if !force && self.last_report.is_some_and(|last| now - last < interval) {
            return;
        }
        self.last_report = Some(now);

        let snapshots = self.snapshots();
        let estimate = self.current_estimate();
        let elapsed = self.run_time();
        let run_id = self.ctx.run_id();
        let reporter = self.ctx.reporter();
        if let Some(task) = snapshots.get(self.current) {
            reporter.report_task_progress(run_id, estimate, elapsed, task, &snapshots);
        }
        reporter.report_run_progress(
            run_id,
            self.ctx.state(),
            self.current_step(),
            &snapshots,
            estimate,
            elapsed,
        );
    }

    fn finish(&mut self) {
        self.finished = true;
        let final_state = match self.ctx.state() {
            RunState::Running => RunState::Success,
            _ => RunState::Failed,
        };
        self.ctx.set_state(final_state);
        let elapsed = self.run_time();
        self.ctx.log(&format!("run finished: {final_state} after {elapsed:.1}s"));
        self.ctx.reporter().report_run_finished(
            self.ctx.run_id(),
            final_state,
            elapsed,
            &self.failed_tasks,
        );
    }

    /// Prepare, preflight and run `plan` in one go
    ///
    /// # Errors
    ///
    /// Returns planning and state-machine errors; task failures are reported
    /// through the returned state.
    pub async fn execute(&mut self, plan: &mut dyn RunnerPlan) -> Result<RunState, Error> {
        self.prepare(plan)?;
        self.preflight()?;
        Ok(self.run().await?)
    }
}
