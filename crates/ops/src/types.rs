//! Types for operations and results

use refurb_errors::OpsError;
use refurb_runner::Runner;
use refurb_types::{Disk, RunState, TaskSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Outcome of one runner execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// Operation name, e.g. `partition`
    pub operation: String,
    pub run_id: Uuid,
    pub state: RunState,
    /// Whether the run reached `Success`
    pub success: bool,
    /// Aggregate estimate at preflight, in seconds
    pub estimate_secs: f64,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Final snapshot of every task
    pub tasks: Vec<TaskSnapshot>,
    /// Descriptions of failed tasks, in order
    pub failed_tasks: Vec<String>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl RunReport {
    /// Snapshot a finished runner
    #[must_use]
    pub fn from_runner(operation: &str, runner: &Runner, elapsed: Duration) -> Self {
        let state = runner.state();
        Self {
            operation: operation.to_string(),
            run_id: runner.ctx().run_id(),
            state,
            success: state == RunState::Success,
            estimate_secs: runner.run_estimate(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            tasks: runner.snapshots(),
            failed_tasks: runner.failed_tasks().to_vec(),
            finished_at: chrono::Utc::now(),
        }
    }

    /// Verdict lines of every failed task, prefixed with its description
    #[must_use]
    pub fn failure_details(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.is_failed())
            .flat_map(|t| {
                std::iter::once(format!("{}: {}", t.description, t.message)).chain(
                    t.verdict
                        .iter()
                        .map(move |line| format!("{}: {line}", t.description)),
                )
            })
            .collect()
    }
}

/// A partition table read from a disk
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableReport {
    pub disk: Disk,
    pub run: RunReport,
}

/// How thoroughly a disk is wiped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WipeMode {
    /// Clear signatures and zero both ends of the disk
    Quick,
    /// Overwrite every byte with zeros
    Zero,
    /// Discard every block (SSDs, thin-provisioned devices)
    Discard,
}

impl FromStr for WipeMode {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "zero" | "full" => Ok(Self::Zero),
            "discard" | "trim" => Ok(Self::Discard),
            _ => Err(OpsError::InvalidWipeMode {
                mode: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for WipeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Quick => "quick",
            Self::Zero => "zero",
            Self::Discard => "discard",
        })
    }
}

/// Images laid down by a restore
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestoreImages {
    /// Partclone image of the root filesystem, optionally zstd-compressed
    pub root: PathBuf,
    /// Image of the EFI System Partition, for restore types that carry one
    pub efi: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wipe_modes_parse_with_aliases() {
        assert_eq!("quick".parse::<WipeMode>().unwrap(), WipeMode::Quick);
        assert_eq!("ZERO".parse::<WipeMode>().unwrap(), WipeMode::Zero);
        assert_eq!("trim".parse::<WipeMode>().unwrap(), WipeMode::Discard);
        assert!(matches!(
            "shred".parse::<WipeMode>(),
            Err(OpsError::InvalidWipeMode { mode }) if mode == "shred"
        ));
    }
}
