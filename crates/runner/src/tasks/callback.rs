//! In-process steps

use async_trait::async_trait;
use refurb_errors::TaskError;

use crate::context::RunCtx;
use crate::state::TaskState;
use crate::task::Task;

type Callback = Box<dyn FnMut(&RunCtx) -> Result<(), TaskError> + Send>;

/// Runs a closure once, on its first poll
pub struct CallbackTask {
    state: TaskState,
    callback: Callback,
}

impl CallbackTask {
    pub fn new<F>(description: impl Into<String>, estimate: f64, callback: F) -> Self
    where
        F: FnMut(&RunCtx) -> Result<(), TaskError> + Send + 'static,
    {
        Self {
            state: TaskState::new(description).with_estimate(estimate),
            callback: Box::new(callback),
        }
    }

    #[must_use]
    pub fn as_teardown(mut self) -> Self {
        self.state.teardown = true;
        self
    }
}

#[async_trait]
impl Task for CallbackTask {
    fn state(&self) -> &TaskState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TaskState {
        &mut self.state
    }

    async fn poll(&mut self, ctx: &RunCtx) -> Result<(), TaskError> {
        (self.callback)(ctx)?;
        self.state.complete();
        Ok(())
    }
}
