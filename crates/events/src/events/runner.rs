use refurb_types::{RunState, TaskSnapshot};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Run-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerEvent {
    /// Preflight finished: the full task list and the aggregate estimate
    TasksPlanned {
        run_id: Uuid,
        estimate: f64,
        tasks: Vec<TaskSnapshot>,
    },

    /// Throttled aggregate progress while the run executes
    Progress {
        run_id: Uuid,
        state: RunState,
        step: usize,
        tasks: Vec<TaskSnapshot>,
        estimate: f64,
        elapsed: f64,
    },

    /// Run reached a terminal state
    Finished {
        run_id: Uuid,
        state: RunState,
        elapsed: f64,
        failed_tasks: Vec<String>,
    },
}
