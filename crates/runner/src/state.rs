//! Lifecycle state shared by every task kind

#![allow(
    clippy::cast_possible_truncation, // progress percentages fit in u32
    clippy::cast_sign_loss            // elapsed and estimates are never negative
)]

use refurb_config::RunnerConfig;
use refurb_errors::TaskError;
use refurb_types::{TaskSnapshot, PROGRESS_DONE, PROGRESS_FAILED};
use std::time::Instant;

/// Highest progress a task may report before completion is confirmed
pub const PROGRESS_CAP: u32 = 99;

/// The bookkeeping part of a task.
///
/// Progress only moves forward. It reaches 100 through [`TaskState::complete`]
/// and the failure sentinel through [`TaskState::fail`], both of which also
/// mark the task done, so a done task never shows an in-between value.
#[derive(Debug, Clone)]
pub struct TaskState {
    pub description: String,
    pub message: String,
    /// 1-based position in the runner, set at preflight
    pub step: usize,
    pub teardown: bool,
    progress: u32,
    verdict: Vec<String>,
    time_estimate: Option<f64>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
    is_started: bool,
    is_done: bool,
}

impl TaskState {
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            message: String::new(),
            step: 0,
            teardown: false,
            progress: 0,
            verdict: Vec::new(),
            time_estimate: None,
            start_time: None,
            end_time: None,
            is_started: false,
            is_done: false,
        }
    }

    /// Set the initial estimate in seconds
    #[must_use]
    pub fn with_estimate(mut self, seconds: f64) -> Self {
        self.time_estimate = Some(seconds);
        self
    }

    /// Mark the task as always-run
    #[must_use]
    pub fn as_teardown(mut self) -> Self {
        self.teardown = true;
        self
    }

    #[must_use]
    pub fn progress(&self) -> u32 {
        self.progress
    }

    /// Raise progress, capped at 99 until the task completes. Lower values
    /// and updates after completion are ignored.
    pub fn set_progress(&mut self, progress: u32) {
        if self.is_done {
            return;
        }
        self.progress = self.progress.max(progress.min(PROGRESS_CAP));
    }

    #[must_use]
    pub fn estimate(&self) -> Option<f64> {
        self.time_estimate
    }

    pub fn set_estimate(&mut self, seconds: f64) {
        self.time_estimate = Some(seconds);
    }

    #[must_use]
    pub fn verdict(&self) -> &[String] {
        &self.verdict
    }

    pub fn append_verdict(&mut self, line: impl Into<String>) {
        self.verdict.push(line.into());
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.is_started
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.is_done
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.is_done && self.progress > PROGRESS_DONE
    }

    /// Stamp the start time
    pub fn start(&mut self) {
        self.is_started = true;
        self.start_time = Some(Instant::now());
    }

    /// Seconds since start, or since start until end once finalized
    #[must_use]
    pub fn elapsed(&self) -> f64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => end.duration_since(start).as_secs_f64(),
            (Some(start), None) => start.elapsed().as_secs_f64(),
            _ => 0.0,
        }
    }

    /// Successful completion
    pub fn complete(&mut self) {
        if !self.is_done {
            self.progress = PROGRESS_DONE;
            self.is_done = true;
        }
    }

    /// Failure: sentinel progress, message set, task done
    pub fn fail(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.progress = PROGRESS_FAILED;
        self.is_done = true;
    }

    /// Setup could not even start the work; polling is skipped
    pub fn setup_failed(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.append_verdict(format!("setup failed: {message}"));
        self.fail(message);
    }

    /// Stamp the end time and replace the estimate with the actual duration
    pub fn finalize(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Instant::now());
        }
        if self.is_started {
            self.time_estimate = Some(self.elapsed());
        }
    }

    /// Time-based progress for tasks without a better signal:
    /// `100 * elapsed / estimate`, capped at 99.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::TimedOut` once elapsed time passes the configured
    /// multiple of the estimate.
    pub fn time_based_progress(&mut self, policy: &RunnerConfig) -> Result<(), TaskError> {
        let Some(estimate) = self.time_estimate.filter(|e| *e > 0.0) else {
            return Ok(());
        };
        let elapsed = self.elapsed();
        if elapsed > policy.timeout_after(estimate) {
            return Err(TaskError::TimedOut {
                task: self.description.clone(),
                elapsed_secs: elapsed,
                estimate_secs: estimate,
            });
        }
        self.set_progress((100.0 * elapsed / estimate) as u32);
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            step: self.step,
            description: self.description.clone(),
            progress: self.progress,
            message: self.message.clone(),
            verdict: self.verdict.clone(),
            estimate: self.time_estimate,
            elapsed: self.is_started.then(|| self.elapsed()),
            is_started: self.is_started,
            is_done: self.is_done,
            teardown: self.teardown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_never_decreases_and_caps_below_done() {
        let mut state = TaskState::new("t");
        state.set_progress(40);
        state.set_progress(20);
        assert_eq!(state.progress(), 40);
        state.set_progress(250);
        assert_eq!(state.progress(), PROGRESS_CAP);
        assert!(!state.is_done());
    }

    #[test]
    fn done_is_exactly_100_or_sentinel() {
        let mut ok = TaskState::new("ok");
        ok.complete();
        ok.set_progress(5);
        assert_eq!(ok.progress(), PROGRESS_DONE);
        assert!(ok.is_done());

        let mut bad = TaskState::new("bad");
        bad.set_progress(50);
        bad.fail("boom");
        assert_eq!(bad.progress(), PROGRESS_FAILED);
        assert!(bad.is_failed());
        assert_eq!(bad.message, "boom");
    }

    #[test]
    fn setup_failure_records_verdict() {
        let mut state = TaskState::new("mkfs");
        state.setup_failed("device missing");
        assert!(state.is_failed());
        assert_eq!(state.verdict(), ["setup failed: device missing"]);
    }

    #[test]
    fn time_policy_times_out() {
        let policy = RunnerConfig {
            timeout_multiplier: 1.0,
            timeout_grace_secs: 0.0,
            ..RunnerConfig::default()
        };
        let mut state = TaskState::new("slow").with_estimate(0.001);
        state.start();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let err = state.time_based_progress(&policy).unwrap_err();
        assert!(matches!(err, TaskError::TimedOut { .. }));
    }

    #[test]
    fn finalize_replaces_estimate() {
        let mut state = TaskState::new("t").with_estimate(1000.0);
        state.start();
        state.complete();
        state.finalize();
        assert!(state.estimate().unwrap() < 1000.0);
    }
}
