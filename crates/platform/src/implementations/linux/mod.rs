//! Linux implementations of the platform operations

pub mod process;

pub use process::LinuxProcessOperations;
