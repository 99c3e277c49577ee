//! External process lifecycle events

use serde::{Deserialize, Serialize};

use super::FailureContext;

/// Process supervision events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PlatformEvent {
    /// Child process started
    ProcessSpawned {
        /// Program being executed
        program: String,
        /// Command arguments
        args: Vec<String>,
        /// OS process id
        pid: Option<u32>,
    },

    /// Child process could not be started
    SpawnFailed {
        program: String,
        failure: FailureContext,
    },

    /// Child process exited
    ProcessExited {
        program: String,
        pid: Option<u32>,
        /// Exit code, absent when killed by a signal
        exit_code: Option<i32>,
        duration_ms: u64,
    },

    /// A signal was delivered as part of cancellation escalation
    SignalSent {
        program: String,
        pid: u32,
        signal: String,
    },
}
