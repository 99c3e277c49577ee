//! Event handling and progress display
//!
//! Two sinks consume the event channel: a console renderer that keeps one
//! live status line on stderr, and a JSON-lines stream of every
//! [`EventMessage`] on stdout.

use console::{style, Term};
use refurb_events::{
    format_bytes, format_duration, format_rate, AppEvent, EventMessage, GeneralEvent, RunnerEvent,
    SyncEvent, TaskEvent,
};
use refurb_types::{RunState, ScoreboardSnapshot, TaskSnapshot};
use std::fmt::Write as _;
use std::io::Write;
use std::time::Duration;

use crate::logging::log_event_with_tracing;

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

/// Event handler for progress display and user feedback
pub struct EventHandler {
    json: bool,
    debug: bool,
    term: Term,
    /// Whether the last thing written to the terminal is a status line
    status_shown: bool,
    total_steps: usize,
}

impl EventHandler {
    pub fn new(json: bool, colors: bool, debug: bool) -> Self {
        console::set_colors_enabled_stderr(colors);
        Self {
            json,
            debug,
            term: Term::stderr(),
            status_shown: false,
            total_steps: 0,
        }
    }

    /// Handle incoming event
    pub fn handle_event(&mut self, message: EventMessage) {
        if self.debug {
            log_event_with_tracing(&message);
        }
        if self.json {
            self.write_json_line(&message);
            return;
        }
        match message.event {
            AppEvent::Runner(event) => self.handle_runner(event),
            AppEvent::Task(event) => self.handle_task(event),
            AppEvent::Sync(event) => self.handle_sync(event),
            AppEvent::General(event) => self.handle_general(event),
            // process spawns and signals only reach the log
            AppEvent::Platform(_) => {}
        }
    }

    fn write_json_line(&self, message: &EventMessage) {
        match serde_json::to_string(message) {
            Ok(line) => {
                let mut stdout = std::io::stdout().lock();
                let _ = writeln!(stdout, "{line}");
                let _ = stdout.flush();
            }
            Err(e) => tracing::warn!("failed to encode event: {e}"),
        }
    }

    fn handle_runner(&mut self, event: RunnerEvent) {
        match event {
            RunnerEvent::TasksPlanned { estimate, tasks, .. } => {
                self.total_steps = tasks.len();
                self.println(&format!(
                    "{} {} tasks, about {}",
                    style("Planned").bold(),
                    tasks.len(),
                    format_duration(secs(estimate))
                ));
                for task in &tasks {
                    let marker = if task.teardown { " (teardown)" } else { "" };
                    self.println(&format!(
                        "  {:>2}. {}{}",
                        task.step,
                        task.description,
                        style(marker).dim()
                    ));
                }
            }
            RunnerEvent::Progress { .. } => {}
            RunnerEvent::Finished {
                state,
                elapsed,
                failed_tasks,
                ..
            } => {
                let took = format_duration(secs(elapsed));
                if state == RunState::Success {
                    self.println(&format!("{} in {took}", style("Finished").green().bold()));
                } else {
                    self.println(&format!(
                        "{} after {took}: {} task(s) failed",
                        style("Failed").red().bold(),
                        failed_tasks.len()
                    ));
                }
            }
        }
    }

    fn handle_task(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Progress {
                estimate,
                elapsed,
                task,
                ..
            } => {
                let line = self.status_line(&task, estimate, elapsed);
                self.status(&line);
            }
            TaskEvent::Succeeded { task, .. } => {
                let took = task.elapsed.map(|e| format_duration(secs(e))).unwrap_or_default();
                self.println(&format!(
                    "{} {} {}",
                    style("✓").green(),
                    task.description,
                    style(took).dim()
                ));
            }
            TaskEvent::Failed { task, .. } => {
                self.println(&format!(
                    "{} {}: {}",
                    style("✗").red(),
                    task.description,
                    task.message
                ));
                for line in &task.verdict {
                    self.println(&format!("    {}", style(line).dim()));
                }
            }
        }
    }

    fn status_line(&self, task: &TaskSnapshot, estimate: f64, elapsed: f64) -> String {
        let remaining = format_duration(secs(estimate - elapsed));
        let mut line = format!(
            "[{}/{}] {} {:>3}%",
            task.step,
            self.total_steps.max(task.step),
            task.description,
            task.progress.min(100)
        );
        if !task.message.is_empty() {
            line.push_str("  ");
            line.push_str(&task.message);
        }
        let _ = write!(line, "  ~{remaining} left");
        line
    }

    fn handle_sync(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Status { destinations, .. } => {
                let line = destinations
                    .iter()
                    .map(destination_cell)
                    .collect::<Vec<_>>()
                    .join("  ");
                self.status(&line);
            }
            SyncEvent::DestinationFailed { key, error, .. } => {
                self.println(&format!(
                    "{} destination {key} dropped: {error}",
                    style("!").yellow()
                ));
            }
            SyncEvent::CopyFinished {
                source,
                bytes,
                succeeded,
                failed,
                ..
            } => {
                self.println(&format!(
                    "copied {} of {source} to {succeeded} destination(s), {failed} failed",
                    format_bytes(bytes)
                ));
            }
        }
    }

    fn handle_general(&mut self, event: GeneralEvent) {
        match event {
            GeneralEvent::Log { message } => {
                if self.debug {
                    self.println(&format!("{}", style(message).dim()));
                }
            }
            GeneralEvent::Warning { message, context } => {
                let context = context.map(|c| format!(" ({c})")).unwrap_or_default();
                self.println(&format!("{} {message}{context}", style("warning:").yellow()));
            }
            GeneralEvent::Error { message, details } => {
                self.println(&format!("{} {message}", style("error:").red()));
                if let Some(details) = details {
                    self.println(&format!("    {details}"));
                }
            }
            GeneralEvent::DebugLog { message, .. } => {
                if self.debug {
                    self.println(&format!("{}", style(message).dim()));
                }
            }
        }
    }

    /// Replace the live status line
    fn status(&mut self, line: &str) {
        if !self.term.is_term() {
            return;
        }
        let width = usize::from(self.term.size().1);
        let line = console::truncate_str(line, width.saturating_sub(1), "…");
        let _ = self.term.clear_line();
        let _ = self.term.write_str(&line);
        self.status_shown = true;
    }

    /// Print a permanent line above the status line
    fn println(&mut self, line: &str) {
        if self.status_shown {
            let _ = self.term.clear_line();
            self.status_shown = false;
        }
        let _ = self.term.write_line(line);
    }

    /// Clear the status line before the final result is rendered
    pub fn finish(&mut self) {
        if self.status_shown && !self.json {
            let _ = self.term.clear_line();
            self.status_shown = false;
        }
    }
}

fn destination_cell(destination: &ScoreboardSnapshot) -> String {
    if destination.alive {
        format!(
            "{} {:.0}% {}",
            destination.key,
            destination.percent(),
            format_rate(destination.bytes_per_second)
        )
    } else {
        format!("{} failed", destination.key)
    }
}
