//! The task contract

use async_trait::async_trait;
use refurb_errors::TaskError;
use refurb_platform::EscalationSignal;
use refurb_types::TaskSnapshot;

use crate::context::RunCtx;
use crate::state::TaskState;

/// One unit of work in a runner's pipeline.
///
/// The runner drives every task through `setup`, repeated `poll` calls until
/// the state reports done, and exactly one `teardown`. An `Err` from any of
/// them fails the task; the runner records the message and moves on.
#[async_trait]
pub trait Task: Send {
    fn state(&self) -> &TaskState;

    fn state_mut(&mut self) -> &mut TaskState;

    /// Called once before the run with this task's index and a snapshot of
    /// every task, to let it refine its estimate from its neighbours
    fn preflight(&mut self, _index: usize, _siblings: &[TaskSnapshot]) {}

    /// Allocate resources and start the work. Returning an error skips polling.
    async fn setup(&mut self, _ctx: &RunCtx) -> Result<(), TaskError> {
        Ok(())
    }

    /// Advance the work. Must return within roughly the configured poll timeout.
    async fn poll(&mut self, ctx: &RunCtx) -> Result<(), TaskError>;

    /// Release resources. Called after polling stops, whatever the outcome.
    async fn teardown(&mut self, _ctx: &RunCtx) -> Result<(), TaskError> {
        Ok(())
    }

    /// Current best estimate of the task's duration in seconds
    fn estimate_time(&self) -> Option<f64> {
        self.state().estimate()
    }

    /// Deliver the next cancellation signal to whatever the task runs.
    /// Tasks without an external process ignore this.
    fn terminate(&mut self) -> Result<Option<EscalationSignal>, TaskError> {
        Ok(None)
    }

    fn snapshot(&self) -> TaskSnapshot {
        self.state().snapshot()
    }
}
