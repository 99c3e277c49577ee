//! Command line interface definition

use clap::{Parser, Subcommand};
use refurb_ops::WipeMode;
use refurb_plan::PlanKind;
use refurb_types::ColorChoice;
use std::path::PathBuf;

/// refurb - Disk re-imaging and fan-out copy pipeline
#[derive(Parser)]
#[command(name = "refurb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Disk re-imaging and fan-out copy pipeline")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Output in JSON format: events as JSON lines on stdout, logs as JSON on stderr
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Color output control
    #[arg(long, global = true, value_enum)]
    pub color: Option<ColorChoice>,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show the partition layout a disk would receive, without writing anything
    Plan {
        /// Disk to measure
        #[arg(required_unless_present = "size", conflicts_with = "size")]
        device: Option<PathBuf>,

        /// Disk size in bytes, instead of measuring a device
        #[arg(long, value_name = "BYTES")]
        size: Option<u64>,

        /// Partition layout
        #[arg(long, value_enum, default_value = "efi")]
        kind: PlanKind,

        /// Leave out the swap partition
        #[arg(long)]
        no_swap: bool,
    },

    /// Partition a disk with a fresh layout and format every partition
    Partition {
        /// Target disk
        device: PathBuf,

        /// Partition layout
        #[arg(long, value_enum, default_value = "efi")]
        kind: PlanKind,
    },

    /// Re-image a disk from partclone images
    Restore {
        /// Target disk
        device: PathBuf,

        /// Root filesystem image (optionally .zst compressed)
        #[arg(long, value_name = "PATH")]
        image: PathBuf,

        /// EFI System Partition image, for restore types that carry one
        #[arg(long, value_name = "PATH")]
        efi_image: Option<PathBuf>,

        /// Restore type descriptor (JSON)
        #[arg(long, value_name = "FILE")]
        restore_type: PathBuf,
    },

    /// Capture one partition into a zstd-compressed image
    Image {
        /// Source disk
        device: PathBuf,

        /// Partition number
        #[arg(long, short)]
        partition: u32,

        /// Output image path
        #[arg(long, short, value_name = "PATH")]
        output: PathBuf,
    },

    /// Wipe a disk
    Wipe {
        /// Target disk
        device: PathBuf,

        /// quick, zero (alias full) or discard (alias trim)
        #[arg(long, default_value = "quick")]
        mode: WipeMode,
    },

    /// Mirror an image catalog onto several disks or directories
    Sync {
        /// Catalog directory
        #[arg(long, value_name = "DIR")]
        source: PathBuf,

        /// Destination devices or directories
        #[arg(required = true)]
        destinations: Vec<PathBuf>,
    },

    /// Copy one file or device to several destinations at once
    Fanout {
        /// Source file or device
        #[arg(long, value_name = "FILE")]
        source: PathBuf,

        /// Destination files or devices
        #[arg(required = true)]
        destinations: Vec<PathBuf>,
    },

    /// Read and show a disk's partition table
    ReadTable {
        /// Disk to read
        device: PathBuf,
    },
}
