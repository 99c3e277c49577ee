//! Per-destination accounting for a fan-out copy

#![allow(clippy::cast_precision_loss)]

use refurb_types::{DestinationStatus, ScoreboardSnapshot};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Live counters for one destination.
///
/// A destination becomes dead on its first error and never comes back.
#[derive(Debug, Clone)]
pub struct Scoreboard {
    key: String,
    target: String,
    total_size: u64,
    completed_size: u64,
    inflight_size: u64,
    completed_seconds: f64,
    inflight_since: Option<Instant>,
    alive: bool,
    status: DestinationStatus,
    error: Option<String>,
}

impl Scoreboard {
    #[must_use]
    pub fn new(key: impl Into<String>, target: impl Into<String>, total_size: u64) -> Self {
        Self {
            key: key.into(),
            target: target.into(),
            total_size,
            completed_size: 0,
            inflight_size: 0,
            completed_seconds: 0.0,
            inflight_since: None,
            alive: true,
            status: DestinationStatus::Pending,
            error: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    #[must_use]
    pub fn completed_size(&self) -> u64 {
        self.completed_size
    }

    /// A chunk of `len` bytes was handed to the writer
    pub fn begin_chunk(&mut self, len: u64) {
        if !self.alive {
            return;
        }
        self.status = DestinationStatus::Copying;
        self.inflight_size = len;
        self.inflight_since = Some(Instant::now());
    }

    /// The writer acknowledged the in-flight chunk
    pub fn ack(&mut self) {
        if let Some(since) = self.inflight_since.take() {
            self.completed_seconds += since.elapsed().as_secs_f64();
        }
        self.completed_size += self.inflight_size;
        self.inflight_size = 0;
    }

    /// Mark dead; later calls keep the first error
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.alive {
            self.alive = false;
            self.error = Some(error.into());
        }
        self.status = DestinationStatus::Failed;
        self.inflight_size = 0;
        self.inflight_since = None;
    }

    /// Every chunk written and flushed
    pub fn succeed(&mut self) {
        if self.alive {
            self.status = DestinationStatus::Success;
        }
    }

    /// Throughput over the time spent writing acknowledged chunks
    #[must_use]
    pub fn bytes_per_second(&self) -> f64 {
        if self.completed_seconds > 0.0 {
            self.completed_size as f64 / self.completed_seconds
        } else {
            0.0
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ScoreboardSnapshot {
        ScoreboardSnapshot {
            key: self.key.clone(),
            target: self.target.clone(),
            total_size: self.total_size,
            completed_size: self.completed_size,
            inflight_size: self.inflight_size,
            completed_seconds: self.completed_seconds,
            inflight_seconds: self
                .inflight_since
                .map_or(0.0, |since| since.elapsed().as_secs_f64()),
            bytes_per_second: self.bytes_per_second(),
            alive: self.alive,
            status: self.status,
            error: self.error.clone(),
        }
    }
}

/// A scoreboard shared between a writer task and observers
pub type SharedScoreboard = Arc<Mutex<Scoreboard>>;

pub(crate) fn with_board<T>(board: &SharedScoreboard, f: impl FnOnce(&mut Scoreboard) -> T) -> T {
    let mut guard = board.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}
