//! Fixed pauses, e.g. to let udev settle after a table rewrite

use async_trait::async_trait;
use refurb_errors::TaskError;
use std::time::{Duration, Instant};

use crate::context::RunCtx;
use crate::state::TaskState;
use crate::task::Task;

pub struct SleepTask {
    state: TaskState,
    duration: Duration,
    deadline: Option<Instant>,
}

impl SleepTask {
    #[must_use]
    pub fn new(description: impl Into<String>, duration: Duration) -> Self {
        Self {
            state: TaskState::new(description).with_estimate(duration.as_secs_f64()),
            duration,
            deadline: None,
        }
    }

    #[must_use]
    pub fn as_teardown(mut self) -> Self {
        self.state.teardown = true;
        self
    }
}

#[async_trait]
impl Task for SleepTask {
    fn state(&self) -> &TaskState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TaskState {
        &mut self.state
    }

    async fn setup(&mut self, _ctx: &RunCtx) -> Result<(), TaskError> {
        self.deadline = Some(Instant::now() + self.duration);
        Ok(())
    }

    async fn poll(&mut self, ctx: &RunCtx) -> Result<(), TaskError> {
        let deadline = *self.deadline.get_or_insert_with(|| Instant::now() + self.duration);
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            self.state.complete();
            return Ok(());
        }
        // never hold the runner longer than one poll timeout
        tokio::time::sleep(remaining.min(ctx.config().runner.poll_timeout())).await;
        if Instant::now() >= deadline {
            self.state.complete();
        } else {
            self.state.time_based_progress(&ctx.config().runner)?;
        }
        Ok(())
    }
}
