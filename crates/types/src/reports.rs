//! Snapshot types handed to reporters
//!
//! Tasks and runners own their live state; reporters only ever see these
//! immutable copies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Progress value marking a failed task
pub const PROGRESS_FAILED: u32 = 999;
/// Progress value marking a successful task
pub const PROGRESS_DONE: u32 = 100;

/// Lifecycle state of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Initial,
    Prepare,
    Preflight,
    Running,
    /// Cancellation requested; only teardown tasks still execute
    Cancelled,
    Success,
    Failed,
}

impl RunState {
    /// Whether no further transitions are possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Prepare => "prepare",
            Self::Preflight => "preflight",
            Self::Running => "running",
            Self::Cancelled => "cancelled",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// 1-based position in the runner, 0 before preflight
    pub step: usize,
    pub description: String,
    pub progress: u32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verdict: Vec<String>,
    /// Current estimate in seconds
    pub estimate: Option<f64>,
    /// Seconds since the task started, if it has
    pub elapsed: Option<f64>,
    pub is_started: bool,
    pub is_done: bool,
    pub teardown: bool,
}

impl TaskSnapshot {
    /// Done with progress above 100
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.is_done && self.progress > PROGRESS_DONE
    }

    /// Done with progress of exactly 100
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.is_done && self.progress == PROGRESS_DONE
    }
}

/// Per-destination status in a fan-out copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationStatus {
    Pending,
    Copying,
    Success,
    Failed,
}

/// Point-in-time copy of one destination's scoreboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreboardSnapshot {
    pub key: String,
    pub target: String,
    pub total_size: u64,
    pub completed_size: u64,
    pub inflight_size: u64,
    pub completed_seconds: f64,
    pub inflight_seconds: f64,
    pub bytes_per_second: f64,
    pub alive: bool,
    pub status: DestinationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScoreboardSnapshot {
    /// Percentage of the source acknowledged by this destination
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.total_size == 0 {
            100.0
        } else {
            self.completed_size as f64 * 100.0 / self.total_size as f64
        }
    }

    /// Remaining time at the current throughput
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn eta(&self) -> Option<Duration> {
        if self.bytes_per_second <= 0.0 {
            return None;
        }
        let remaining = self.total_size.saturating_sub(self.completed_size) as f64;
        Some(Duration::from_secs_f64(remaining / self.bytes_per_second))
    }
}
