//! The task kinds the runner ships with

mod callback;
mod clone;
mod deferred;
mod partition_table;
mod process;
mod sleep;

pub use callback::CallbackTask;
pub use clone::{clone_task, CloneProgress, CloneStatus, CloneTask, BANNER_PROGRESS, PARTCLONE_BANNER};
pub use deferred::DeferredTask;
pub use partition_table::{
    filesystem_id_task, parse_blkid_export, parse_sfdisk_json, BlkidInfo, BlkidParser,
    FilesystemIdTask, PartitionTableTask, SfdiskCollector, BLKID_GOOD_CODES,
};
pub use process::{NoParser, OutputParser, ProcessTask};
pub use sleep::SleepTask;
