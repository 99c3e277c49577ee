#![allow(
    clippy::cast_precision_loss,        // Mathematical calculations require f64
    clippy::cast_possible_truncation,   // Intentional for progress calculations
    clippy::cast_sign_loss              // Durations and rates are never negative
)]

//! Progress math shared by tasks and renderers
//!
//! - [`MovingAverage`]: fixed-window simple moving average used to smooth
//!   time estimates parsed from noisy tool output
//! - formatting helpers for durations, byte counts and transfer rates

mod average;
mod format;

pub use average::MovingAverage;
pub use format::{format_bytes, format_duration, format_rate};
