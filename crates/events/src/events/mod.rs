use serde::{Deserialize, Serialize};

use crate::EventSource;
use refurb_errors::UserFacingError;

/// Structured failure information shared across domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    /// Stable error code, when the error has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Short user-facing message.
    pub message: String,
    /// Optional remediation hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether retrying the operation might succeed.
    pub retryable: bool,
}

impl FailureContext {
    /// Build failure context from a `UserFacingError` implementation.
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self {
            code: error.user_code().map(Into::into),
            message: error.user_message().into_owned(),
            hint: error.user_hint().map(Into::into),
            retryable: error.is_retryable(),
        }
    }
}

pub mod general;
pub mod platform;
pub mod runner;
pub mod sync;
pub mod task;

pub use general::*;
pub use platform::*;
pub use runner::*;
pub use sync::*;
pub use task::*;

/// Top-level application event enum that aggregates all domain-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// Log lines, warnings and errors not tied to a task
    General(GeneralEvent),

    /// Run-level lifecycle and aggregate progress
    Runner(RunnerEvent),

    /// Per-task progress, success and failure
    Task(TaskEvent),

    /// Fan-out copy scoreboards and destination outcomes
    Sync(SyncEvent),

    /// External process spawn, exit and signal delivery
    Platform(PlatformEvent),
}

impl AppEvent {
    /// Identify the source domain for this event (used for metadata/logging).
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::General(_) => EventSource::GENERAL,
            Self::Runner(_) => EventSource::RUNNER,
            Self::Task(_) => EventSource::TASK,
            Self::Sync(_) => EventSource::SYNC,
            Self::Platform(_) => EventSource::PLATFORM,
        }
    }

    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::General(GeneralEvent::Error { .. })
            | Self::Task(TaskEvent::Failed { .. })
            | Self::Sync(SyncEvent::DestinationFailed { .. })
            | Self::Platform(PlatformEvent::SpawnFailed { .. }) => Level::ERROR,

            Self::Runner(RunnerEvent::Finished { state, .. })
                if *state == refurb_types::RunState::Failed =>
            {
                Level::ERROR
            }

            Self::General(GeneralEvent::Warning { .. })
            | Self::Platform(PlatformEvent::SignalSent { .. }) => Level::WARN,

            Self::General(GeneralEvent::DebugLog { .. })
            | Self::Task(TaskEvent::Progress { .. })
            | Self::Runner(RunnerEvent::Progress { .. })
            | Self::Sync(SyncEvent::Status { .. }) => Level::DEBUG,

            _ => Level::INFO,
        }
    }

    /// Get the log target for this event (for structured logging)
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::General(_) => "refurb::events::general",
            Self::Runner(_) => "refurb::events::runner",
            Self::Task(_) => "refurb::events::task",
            Self::Sync(_) => "refurb::events::sync",
            Self::Platform(_) => "refurb::events::platform",
        }
    }
}
