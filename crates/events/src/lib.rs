#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system and reporter boundary for refurb
//!
//! Runners and tasks never print. Everything they want an operator to see goes
//! through a [`Reporter`], whose channel-backed implementation turns each call
//! into a typed [`AppEvent`] wrapped in an [`EventMessage`]. Console and JSON
//! rendering live in the CLI as adapters over the received messages.
//!
//! ## Architecture
//!
//! - **Domain events**: grouped by origin (Runner, Task, Sync, Platform, General)
//! - **`EventEmitter` trait**: one API for anything holding an event sender
//! - **`Reporter` trait**: the progress/log boundary runners are written against
//! - **Progress helpers**: moving averages and human formatting of ETAs and rates

pub mod meta;
pub use meta::{EventLevel, EventMessage, EventMeta, EventSource};

pub mod progress;
pub use progress::{format_bytes, format_duration, format_rate, MovingAverage};

pub mod reporter;
pub use reporter::{EventReporter, NullReporter, RecordingReporter, Reporter, SharedReporter};

pub mod events;
pub use events::{
    AppEvent, FailureContext, GeneralEvent, PlatformEvent, RunnerEvent, SyncEvent, TaskEvent,
};

use tokio::sync::mpsc::UnboundedSender;

/// Type alias for the event sender
pub type EventSender = UnboundedSender<EventMessage>;

/// Type alias for the event receiver
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<EventMessage>;

/// Create a new event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// The unified trait for emitting events
///
/// Implemented for the raw `EventSender` and for anything that holds one.
pub trait EventEmitter {
    /// Get the event sender for this emitter
    fn event_sender(&self) -> Option<&EventSender>;

    /// Emit an event with explicit metadata
    fn emit_with_meta(&self, meta: EventMeta, event: AppEvent) {
        if let Some(sender) = self.event_sender() {
            // Ignore send errors - if receiver is dropped, we just continue
            let _ = sender.send(EventMessage::new(meta, event));
        }
    }

    /// Emit an event with metadata derived from the event
    fn emit(&self, event: AppEvent) {
        let meta = EventMeta::for_event(&event);
        self.emit_with_meta(meta, event);
    }

    fn emit_debug(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::debug(message)));
    }

    fn emit_warning(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning(message)));
    }

    fn emit_warning_with_context(&self, message: impl Into<String>, context: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning_with_context(
            message, context,
        )));
    }

    fn emit_error(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::error(message)));
    }

    fn emit_error_with_details(&self, message: impl Into<String>, details: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::error_with_details(
            message, details,
        )));
    }
}

impl EventEmitter for EventSender {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(self)
    }
}
