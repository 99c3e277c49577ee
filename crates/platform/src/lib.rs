#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Platform abstraction layer for external tool execution on Linux.
//!
//! This crate provides:
//! - One-shot command execution with captured output and event emission
//! - Supervised long-running processes: piped stdout/stderr readers, line
//!   reconstruction and signal escalation on cancellation
//!
//! Every spawn, exit and signal is reported as a `PlatformEvent` when the
//! context carries an event sender.

pub mod core;
pub mod implementations;
pub mod process;
pub mod supervisor;

pub use core::{Platform, PlatformContext};
pub use implementations::linux::LinuxProcessOperations;

/// Re-export commonly used types
pub use process::{shell_quote, CommandOutput, PlatformCommand, ProcessOperations};
pub use supervisor::{
    EscalationSignal, ExitOutcome, OutputStream, PollStatus, SignalEscalation, SupervisedProcess,
};
