//! Per-run context handed to every task

use refurb_config::Config;
use refurb_events::{EventSender, SharedReporter};
use refurb_platform::{Platform, PlatformContext};
use refurb_types::RunState;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

struct RunShared {
    run_id: Uuid,
    state: Mutex<RunState>,
    cancel_requests: AtomicUsize,
    config: Config,
    reporter: SharedReporter,
    platform: Platform,
    platform_ctx: PlatformContext,
}

/// Everything a task may need from its runner: run id, live state,
/// configuration, the reporter and the platform layer.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Clone)]
pub struct RunCtx {
    inner: Arc<RunShared>,
}

impl RunCtx {
    #[must_use]
    pub fn new(config: Config, reporter: SharedReporter, events: Option<EventSender>) -> Self {
        let platform = Platform::current();
        let platform_ctx = platform.create_context(events);
        Self {
            inner: Arc::new(RunShared {
                run_id: Uuid::new_v4(),
                state: Mutex::new(RunState::Initial),
                cancel_requests: AtomicUsize::new(0),
                config,
                reporter,
                platform,
                platform_ctx,
            }),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: RunState) {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Whether the run is executing normally (not cancelled or failed)
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Number of cancellation requests received so far
    #[must_use]
    pub fn cancel_requests(&self) -> usize {
        self.inner.cancel_requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[must_use]
    pub fn reporter(&self) -> &SharedReporter {
        &self.inner.reporter
    }

    #[must_use]
    pub fn platform(&self) -> &Platform {
        &self.inner.platform
    }

    #[must_use]
    pub fn platform_context(&self) -> &PlatformContext {
        &self.inner.platform_ctx
    }

    /// Log a line through the reporter and tracing
    pub fn log(&self, message: &str) {
        tracing::info!(run_id = %self.inner.run_id, "{message}");
        self.inner.reporter.log(self.inner.run_id, message);
    }

    #[must_use]
    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Cancellation handle for a run, usable from another task or a signal handler
#[derive(Clone)]
pub struct RunnerHandle {
    inner: Arc<RunShared>,
}

impl RunnerHandle {
    /// Request cancellation.
    ///
    /// The first request moves a running run to `Cancelled`; remaining
    /// non-teardown tasks are skipped and the active process task is sent
    /// SIGINT. Every further request escalates that process one step
    /// (SIGTERM, then SIGKILL).
    pub fn cancel(&self) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *state == RunState::Running {
            *state = RunState::Cancelled;
        }
        let requests = self.inner.cancel_requests.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(run_id = %self.inner.run_id, requests, "cancellation requested");
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }
}
