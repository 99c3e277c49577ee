//! Tasks whose command depends on what earlier tasks found

use async_trait::async_trait;
use refurb_errors::TaskError;
use refurb_platform::EscalationSignal;

use crate::context::RunCtx;
use crate::state::TaskState;
use crate::task::Task;

type Builder = Box<dyn FnOnce(&RunCtx) -> Result<Box<dyn Task>, TaskError> + Send>;

/// Builds its real task at setup time and delegates to it from then on.
///
/// Until setup the placeholder state (description and estimate) stands in
/// for the real task, so preflight still sees an estimate.
pub struct DeferredTask {
    state: TaskState,
    build: Option<Builder>,
    inner: Option<Box<dyn Task>>,
}

impl DeferredTask {
    pub fn new<F>(description: impl Into<String>, estimate: f64, build: F) -> Self
    where
        F: FnOnce(&RunCtx) -> Result<Box<dyn Task>, TaskError> + Send + 'static,
    {
        Self {
            state: TaskState::new(description).with_estimate(estimate),
            build: Some(Box::new(build)),
            inner: None,
        }
    }

    #[must_use]
    pub fn as_teardown(mut self) -> Self {
        self.state.teardown = true;
        self
    }
}

#[async_trait]
impl Task for DeferredTask {
    fn state(&self) -> &TaskState {
        self.inner.as_ref().map_or(&self.state, |t| t.state())
    }

    fn state_mut(&mut self) -> &mut TaskState {
        match self.inner.as_mut() {
            Some(task) => task.state_mut(),
            None => &mut self.state,
        }
    }

    async fn setup(&mut self, ctx: &RunCtx) -> Result<(), TaskError> {
        let Some(build) = self.build.take() else {
            return Err(TaskError::setup(
                self.state.description.clone(),
                "task was already set up",
            ));
        };
        let mut inner = build(ctx)?;
        {
            let state = inner.state_mut();
            state.step = self.state.step;
            state.teardown = self.state.teardown;
            if state.estimate().is_none() {
                if let Some(estimate) = self.state.estimate() {
                    state.set_estimate(estimate);
                }
            }
            state.start();
        }
        tracing::debug!(
            placeholder = %self.state.description,
            task = %inner.state().description,
            "deferred task built"
        );
        let inner = self.inner.insert(inner);
        inner.setup(ctx).await
    }

    async fn poll(&mut self, ctx: &RunCtx) -> Result<(), TaskError> {
        match self.inner.as_mut() {
            Some(task) => task.poll(ctx).await,
            None => Err(TaskError::failed(
                self.state.description.clone(),
                "task was never set up",
            )),
        }
    }

    async fn teardown(&mut self, ctx: &RunCtx) -> Result<(), TaskError> {
        match self.inner.as_mut() {
            Some(task) => task.teardown(ctx).await,
            None => Ok(()),
        }
    }

    fn terminate(&mut self) -> Result<Option<EscalationSignal>, TaskError> {
        match self.inner.as_mut() {
            Some(task) => task.terminate(),
            None => Ok(None),
        }
    }
}
