use refurb_types::TaskSnapshot;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-task events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Progress {
        run_id: Uuid,
        estimate: f64,
        elapsed: f64,
        task: TaskSnapshot,
        tasks: Vec<TaskSnapshot>,
    },

    Succeeded {
        run_id: Uuid,
        elapsed: f64,
        task: TaskSnapshot,
    },

    /// The snapshot carries the failure message and verdict trail
    Failed {
        run_id: Uuid,
        elapsed: f64,
        task: TaskSnapshot,
    },
}
