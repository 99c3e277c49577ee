#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Fan-out copy and catalog sync for refurb
//!
//! [`SyncEngine`] streams one source to many [`DestinationWriter`]s, keeping a
//! [`Scoreboard`] per destination. [`FanoutCopyTask`] and [`RsyncTask`] wrap
//! the two copy styles as runner tasks, and [`CatalogSync`] plans a whole
//! catalog sync from them.

mod catalog;
mod engine;
mod fanout;
mod rsync;
mod scoreboard;
mod writer;

pub use catalog::{scan_catalog, CatalogDestination, CatalogListing, CatalogSync};
pub use engine::{SyncEngine, SyncMonitor, SyncOutcome, SyncReport};
pub use fanout::{DestinationSpec, FanoutCopyTask, ASSUMED_RATE};
pub use rsync::{rsync_script, rsync_task, RsyncChild, RsyncLine, RsyncProgress, RsyncTask};
pub use scoreboard::{Scoreboard, SharedScoreboard};
pub use writer::{DestinationWriter, FileWriter, MemoryBuffer, MemoryWriter};
