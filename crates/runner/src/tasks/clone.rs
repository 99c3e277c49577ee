//! Partition image save and restore through partclone

#![allow(
    clippy::cast_possible_truncation, // percentages are 0..=100
    clippy::cast_sign_loss
)]

use refurb_errors::TaskError;
use refurb_events::MovingAverage;
use refurb_platform::{OutputStream, PlatformCommand};
use regex::Regex;

use crate::state::TaskState;
use crate::tasks::process::{OutputParser, ProcessTask};

/// Lines partclone prints before its first status line, in order
pub const PARTCLONE_BANNER: [&str; 7] = [
    "Partclone",
    "Starting to",
    "File system",
    "Device size",
    "Space in use",
    "Free Space",
    "Block size",
];

/// Progress reported once the banner has been consumed
pub const BANNER_PROGRESS: u32 = 10;

const STATUS_PATTERN: &str = r"Elapsed:?\s*(\d+):(\d{2}):(\d{2}),\s*Remaining:?\s*(\d+):(\d{2}):(\d{2}),\s*Completed:?\s*([\d.]+)\s*%";

/// One parsed partclone status line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloneStatus {
    pub elapsed: f64,
    pub remaining: f64,
    pub percent: f64,
}

/// Progress parser for partclone's stderr
pub struct CloneProgress {
    banner_seen: usize,
    average: MovingAverage,
    status: Regex,
}

impl CloneProgress {
    /// `window` is the number of `elapsed + remaining` samples the estimate
    /// is averaged over
    ///
    /// # Errors
    ///
    /// Returns `TaskError::Parse` if the status pattern fails to compile.
    pub fn new(window: usize) -> Result<Self, TaskError> {
        let status = Regex::new(STATUS_PATTERN).map_err(|e| TaskError::Parse {
            tool: "partclone".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            banner_seen: 0,
            average: MovingAverage::new(window),
            status,
        })
    }

    #[must_use]
    pub fn banner_complete(&self) -> bool {
        self.banner_seen >= PARTCLONE_BANNER.len()
    }

    /// Smoothed total-duration estimate, if any status line was seen
    #[must_use]
    pub fn estimate(&self) -> Option<f64> {
        self.average.value()
    }

    /// Parse an `Elapsed .., Remaining .., Completed ..%` line
    #[must_use]
    pub fn parse_status(&self, line: &str) -> Option<CloneStatus> {
        let caps = self.status.captures(line)?;
        let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());
        let hms = |h: usize| Some(field(h)? * 3600.0 + field(h + 1)? * 60.0 + field(h + 2)?);
        Some(CloneStatus {
            elapsed: hms(1)?,
            remaining: hms(4)?,
            percent: field(7)?,
        })
    }
}

impl OutputParser for CloneProgress {
    fn feed(
        &mut self,
        _stream: OutputStream,
        line: &str,
        state: &mut TaskState,
    ) -> Result<(), TaskError> {
        if !self.banner_complete() {
            if line.trim_start().starts_with(PARTCLONE_BANNER[self.banner_seen]) {
                self.banner_seen += 1;
                if self.banner_complete() {
                    state.set_progress(BANNER_PROGRESS);
                }
            }
            return Ok(());
        }

        if let Some(status) = self.parse_status(line) {
            let percent = status.percent.clamp(0.0, 100.0);
            state.set_progress((f64::from(BANNER_PROGRESS) + 0.9 * percent) as u32);
            let estimate = self.average.push(status.elapsed + status.remaining);
            state.set_estimate(estimate);
            state.message = format!("{percent:.1}% done, {:.0}s left", status.remaining);
        }
        Ok(())
    }

    fn reports_progress(&self) -> bool {
        self.banner_complete()
    }
}

/// A partclone run, usually inside a compression pipeline
pub type CloneTask = ProcessTask<CloneProgress>;

/// Build a clone task from an already assembled command line
///
/// # Errors
///
/// Returns `TaskError::Parse` if the progress parser cannot be built.
pub fn clone_task(
    description: impl Into<String>,
    command: PlatformCommand,
    estimate: f64,
    window: usize,
) -> Result<CloneTask, TaskError> {
    Ok(ProcessTask::with_parser(description, command, CloneProgress::new(window)?)
        .with_estimate(estimate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut CloneProgress, state: &mut TaskState, lines: &[&str]) {
        for line in lines {
            parser.feed(OutputStream::Stderr, line, state).unwrap();
        }
    }

    const BANNER: [&str; 7] = [
        "Partclone v0.3.13 http://partclone.org",
        "Starting to clone device (/dev/sda2) to image (-)",
        "File system:  EXTFS",
        "Device size:   53.7 GB = 13107200 Blocks",
        "Space in use:   9.8 GB = 2392064 Blocks",
        "Free Space:    43.9 GB = 10715136 Blocks",
        "Block size:   4096 Byte",
    ];

    #[test]
    fn banner_then_status() {
        let mut parser = CloneProgress::new(3).unwrap();
        let mut state = TaskState::new("clone");
        feed_all(&mut parser, &mut state, &BANNER[..6]);
        assert_eq!(state.progress(), 0);
        feed_all(&mut parser, &mut state, &BANNER[6..]);
        assert_eq!(state.progress(), BANNER_PROGRESS);

        feed_all(
            &mut parser,
            &mut state,
            &["Elapsed 00:00:10, Remaining 00:01:30, Completed 10.0%"],
        );
        assert_eq!(state.progress(), 19);
        assert!((state.estimate().unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn unrelated_lines_do_not_advance_the_banner() {
        let mut parser = CloneProgress::new(3).unwrap();
        let mut state = TaskState::new("clone");
        feed_all(&mut parser, &mut state, &[BANNER[0], "noise", "more noise"]);
        feed_all(&mut parser, &mut state, &BANNER[1..]);
        assert!(parser.banner_complete());
    }

    #[test]
    fn status_before_banner_is_ignored() {
        let mut parser = CloneProgress::new(3).unwrap();
        let mut state = TaskState::new("clone");
        feed_all(
            &mut parser,
            &mut state,
            &["Elapsed 00:00:10, Remaining 00:01:30, Completed 50.0%"],
        );
        assert_eq!(state.progress(), 0);
        assert!(parser.estimate().is_none());
    }

    #[test]
    fn estimate_is_averaged_over_the_window() {
        let mut parser = CloneProgress::new(2).unwrap();
        let mut state = TaskState::new("clone");
        feed_all(&mut parser, &mut state, &BANNER);
        feed_all(
            &mut parser,
            &mut state,
            &[
                "Elapsed: 00:00:10, Remaining: 00:01:30, Completed:  10.00%, Rate: 1.2GB/min",
                "Elapsed: 00:00:20, Remaining: 00:02:00, Completed:  14.00%, Rate: 1.1GB/min",
                "Elapsed: 00:00:30, Remaining: 00:02:10, Completed:  18.00%, Rate: 1.1GB/min",
            ],
        );
        // last two samples: 140 and 160
        assert!((state.estimate().unwrap() - 150.0).abs() < 1e-9);
        assert_eq!(state.progress(), 26);
    }

    #[test]
    fn full_completion_stays_below_done() {
        let mut parser = CloneProgress::new(3).unwrap();
        let mut state = TaskState::new("clone");
        feed_all(&mut parser, &mut state, &BANNER);
        feed_all(
            &mut parser,
            &mut state,
            &["Elapsed 01:00:00, Remaining 00:00:00, Completed 100.00%"],
        );
        assert_eq!(state.progress(), 99);
        assert!(!state.is_done());
    }

    #[test]
    fn parses_hours() {
        let parser = CloneProgress::new(3).unwrap();
        let status = parser
            .parse_status("Elapsed 01:02:03, Remaining 10:00:00, Completed 42.5%")
            .unwrap();
        assert!((status.elapsed - 3723.0).abs() < 1e-9);
        assert!((status.remaining - 36000.0).abs() < 1e-9);
        assert!((status.percent - 42.5).abs() < 1e-9);
    }
}
