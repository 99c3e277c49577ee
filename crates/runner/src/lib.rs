#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Task contract and runner state machine for refurb
//!
//! A [`Runner`] owns an ordered list of [`Task`]s produced by a
//! [`RunnerPlan`]. It moves through `Initial -> Prepare -> Preflight ->
//! Running` and ends in `Success` or `Failed`, driving each task through
//! setup, bounded polls and teardown while reporting progress through the
//! run's [`refurb_events::Reporter`].
//!
//! Teardown-marked tasks run even after a failure or cancellation, in their
//! original order.

mod context;
mod runner;
mod state;
mod task;
pub mod tasks;

pub use context::{RunCtx, RunnerHandle};
pub use runner::{Runner, RunnerPlan, StaticPlan};
pub use state::{TaskState, PROGRESS_CAP};
pub use task::Task;
pub use tasks::{
    clone_task, CallbackTask, CloneProgress, CloneTask, DeferredTask, FilesystemIdTask, NoParser,
    OutputParser, PartitionTableTask, ProcessTask, SleepTask,
};
