use refurb_types::ScoreboardSnapshot;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fan-out copy events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Periodic snapshot of every destination's scoreboard
    Status {
        run_id: Uuid,
        destinations: Vec<ScoreboardSnapshot>,
    },

    /// A destination died and was excluded from further chunks
    DestinationFailed {
        run_id: Uuid,
        key: String,
        error: String,
    },

    /// All chunks distributed; `failed` destinations did not survive
    CopyFinished {
        run_id: Uuid,
        source: String,
        bytes: u64,
        succeeded: usize,
        failed: usize,
    },
}
