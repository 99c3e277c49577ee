//! Operations context for dependency injection

use refurb_config::Config;
use refurb_errors::Error;
use refurb_events::{EventReporter, EventSender, NullReporter, SharedReporter};
use refurb_runner::{RunCtx, Runner, RunnerHandle, RunnerPlan};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::types::RunReport;

#[derive(Default)]
struct CancelSlot {
    active: Option<RunnerHandle>,
    /// Requests that arrived while no run was active
    pending: usize,
}

/// Forwards cancellation requests to whichever run is active.
///
/// Requests made before a run starts are replayed on it as soon as it
/// registers.
#[derive(Clone, Default)]
pub struct CancelHandle {
    slot: Arc<Mutex<CancelSlot>>,
}

impl CancelHandle {
    /// Cancel the active run, or escalate if it is already cancelling
    pub fn cancel(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match &slot.active {
            Some(handle) => handle.cancel(),
            None => slot.pending += 1,
        }
    }

    fn register(&self, handle: RunnerHandle) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        for _ in 0..std::mem::take(&mut slot.pending) {
            handle.cancel();
        }
        slot.active = Some(handle);
    }

    fn clear(&self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active = None;
    }
}

/// Operations context providing configuration, the reporter and the event
/// channel to every operation
pub struct OpsCtx {
    /// System configuration
    pub config: Config,
    /// Receives progress of every run
    pub reporter: SharedReporter,
    /// Event sender for platform and sync events
    pub tx: Option<EventSender>,
    cancel: CancelHandle,
}

impl OpsCtx {
    // No public constructor - use OpsContextBuilder instead

    /// Handle for signal handlers; cancels whichever run is active
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// A fresh runner wired to this context
    #[must_use]
    pub fn runner(&self) -> Runner {
        Runner::new(RunCtx::new(
            self.config.clone(),
            Arc::clone(&self.reporter),
            self.tx.clone(),
        ))
    }

    /// Run `plan` to completion on a fresh runner.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan cannot be prepared. Task failures are
    /// not errors; they show in the report.
    pub async fn execute(&self, plan: &mut dyn RunnerPlan) -> Result<RunReport, Error> {
        let mut runner = self.runner();
        let operation = plan.name().to_string();
        let started = Instant::now();
        tracing::info!(%operation, run_id = %runner.ctx().run_id(), "starting run");

        self.cancel.register(runner.handle());
        let result = runner.execute(plan).await;
        self.cancel.clear();

        match result {
            Ok(state) => {
                tracing::info!(%operation, %state, "run finished");
                Ok(RunReport::from_runner(&operation, &runner, started.elapsed()))
            }
            Err(e) => {
                tracing::error!(%operation, "run could not start: {e}");
                Err(e)
            }
        }
    }
}

/// Builder for operations context
pub struct OpsContextBuilder {
    config: Option<Config>,
    reporter: Option<SharedReporter>,
    tx: Option<EventSender>,
}

impl OpsContextBuilder {
    /// Create new context builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            reporter: None,
            tx: None,
        }
    }

    /// Set configuration
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set event sender; without an explicit reporter, runs report through it
    #[must_use]
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Build the context. Missing parts fall back to the default
    /// configuration and a reporter that discards everything.
    #[must_use]
    pub fn build(self) -> OpsCtx {
        let reporter = match (self.reporter, &self.tx) {
            (Some(reporter), _) => reporter,
            (None, Some(tx)) => Arc::new(EventReporter::new(tx.clone())) as SharedReporter,
            (None, None) => Arc::new(NullReporter) as SharedReporter,
        };
        OpsCtx {
            config: self.config.unwrap_or_default(),
            reporter,
            tx: self.tx,
            cancel: CancelHandle::default(),
        }
    }
}

impl Default for OpsContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
