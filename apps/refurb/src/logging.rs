//! Logging setup and structured logging of events
//!
//! Logs always go to stderr so stdout stays clean for results and the JSON
//! event stream.

use refurb_events::{AppEvent, EventMessage, RunnerEvent, SyncEvent, TaskEvent};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging
///
/// `RUST_LOG` wins when set; otherwise `--debug` raises the refurb crates
/// to debug. JSON mode switches the formatter to JSON.
pub fn init_tracing(json_mode: bool, debug_enabled: bool) {
    let default_filter = if debug_enabled {
        "info,refurb=debug,refurb_ops=debug,refurb_runner=debug,refurb_sync=debug,refurb_platform=debug"
    } else {
        "warn,refurb=info,refurb_ops=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if json_mode {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(debug_enabled)
            .with_env_filter(filter)
            .init();
    }
}

/// Log an event using the tracing infrastructure with structured fields
pub fn log_event_with_tracing(message: &EventMessage) {
    let meta = &message.meta;
    let source = meta.source.as_str();
    let run = meta.correlation_id.as_deref().unwrap_or("-");

    match &message.event {
        AppEvent::Runner(RunnerEvent::TasksPlanned { estimate, tasks, .. }) => {
            info!(source, run, estimate, tasks = tasks.len(), "tasks planned");
        }
        AppEvent::Runner(RunnerEvent::Finished {
            state,
            elapsed,
            failed_tasks,
            ..
        }) => {
            info!(source, run, %state, elapsed, failed = ?failed_tasks, "run finished");
        }
        AppEvent::Task(TaskEvent::Succeeded { task, elapsed, .. }) => {
            info!(source, run, step = task.step, task = %task.description, elapsed, "task succeeded");
        }
        AppEvent::Task(TaskEvent::Failed { task, elapsed, .. }) => {
            error!(
                source,
                run,
                step = task.step,
                task = %task.description,
                message = %task.message,
                verdict = ?task.verdict,
                elapsed,
                "task failed"
            );
        }
        AppEvent::Sync(SyncEvent::DestinationFailed { key, error, .. }) => {
            warn!(source, run, destination = %key, %error, "destination failed");
        }
        other => {
            let level = meta.tracing_level();
            if level == Level::ERROR {
                error!(source, run, event = ?other, "event");
            } else if level == Level::WARN {
                warn!(source, run, event = ?other, "event");
            } else {
                debug!(source, run, event = ?other, "event");
            }
        }
    }
}
