#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for refurb
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/refurb/config.toml)
//! - Environment variables
//! - CLI flags (applied by the binary)

pub mod constants;

use refurb_errors::{ConfigError, Error};
use refurb_types::{ColorChoice, OutputFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub tools: ToolPaths,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
    #[serde(default = "default_color_choice")]
    pub color: ColorChoice,
}

/// Runner scheduling and timeout policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Upper bound on how long one poll may wait for process output
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Pause between polls of the current task
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Minimum spacing between run-level progress reports
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
    /// A task without its own progress signal fails once elapsed time exceeds
    /// this multiple of its estimate...
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: f64,
    /// ...and at least this many seconds past it
    #[serde(default = "default_timeout_grace_secs")]
    pub timeout_grace_secs: f64,
    /// Window of the moving average smoothing clone-tool estimates
    #[serde(default = "default_estimate_window")]
    pub estimate_window: usize,
}

/// Fan-out copy tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Chunks buffered per destination before the reader waits
    #[serde(default = "default_channel_depth")]
    pub channel_depth: usize,
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
}

/// Paths of the external tools tasks invoke
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub sfdisk: String,
    pub blkid: String,
    pub partclone_prefix: String,
    pub mkfs_ext4: String,
    pub mkfs_vfat: String,
    pub mkswap: String,
    pub e2fsck: String,
    pub resize2fs: String,
    pub wipefs: String,
    pub blkdiscard: String,
    pub dd: String,
    pub zstd: String,
    pub rsync: String,
    pub mount: String,
    pub umount: String,
    pub partprobe: String,
    pub udevadm: String,
}

// Default implementations

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: OutputFormat::Tty,
            color: ColorChoice::Auto,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            report_interval_ms: default_report_interval_ms(),
            timeout_multiplier: default_timeout_multiplier(),
            timeout_grace_secs: default_timeout_grace_secs(),
            estimate_window: default_estimate_window(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            channel_depth: default_channel_depth(),
            status_interval_ms: default_status_interval_ms(),
        }
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            sfdisk: "sfdisk".to_string(),
            blkid: "blkid".to_string(),
            partclone_prefix: "partclone".to_string(),
            mkfs_ext4: "mkfs.ext4".to_string(),
            mkfs_vfat: "mkfs.vfat".to_string(),
            mkswap: "mkswap".to_string(),
            e2fsck: "e2fsck".to_string(),
            resize2fs: "resize2fs".to_string(),
            wipefs: "wipefs".to_string(),
            blkdiscard: "blkdiscard".to_string(),
            dd: "dd".to_string(),
            zstd: "zstd".to_string(),
            rsync: "rsync".to_string(),
            mount: "mount".to_string(),
            umount: "umount".to_string(),
            partprobe: "partprobe".to_string(),
            udevadm: "udevadm".to_string(),
        }
    }
}

// Default value functions for serde
fn default_output_format() -> OutputFormat {
    OutputFormat::Tty
}

fn default_color_choice() -> ColorChoice {
    ColorChoice::Auto
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_report_interval_ms() -> u64 {
    300 // ~3 updates per second
}

fn default_timeout_multiplier() -> f64 {
    3.0
}

fn default_timeout_grace_secs() -> f64 {
    30.0
}

fn default_estimate_window() -> usize {
    3
}

fn default_chunk_size() -> usize {
    4 * 1024 * 1024
}

fn default_channel_depth() -> usize {
    4
}

fn default_status_interval_ms() -> u64 {
    1000
}

impl RunnerConfig {
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    #[must_use]
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    /// Elapsed seconds after which a task estimated at `estimate` seconds is
    /// considered hung
    #[must_use]
    pub fn timeout_after(&self, estimate: f64) -> f64 {
        (estimate * self.timeout_multiplier).max(estimate + self.timeout_grace_secs)
    }
}

impl SyncConfig {
    #[must_use]
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(1))
    }
}

impl ToolPaths {
    /// Full partclone binary name for a filesystem suffix, e.g. `partclone.extfs`
    #[must_use]
    pub fn partclone(&self, suffix: &str) -> String {
        format!("{}.{suffix}", self.partclone_prefix)
    }
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir
            .join(constants::CONFIG_DIR_NAME)
            .join(constants::CONFIG_FILE_NAME))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax that cannot be parsed.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).await.map_err(|e| {
            let path = path.display().to_string();
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound { path }
            } else {
                ConfigError::Unreadable {
                    path,
                    message: e.to_string(),
                }
            }
        })?;

        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            tracing::debug!("no config at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: &Option<PathBuf>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Reject values the runner cannot work with
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::OutOfRange` naming the first offending field.
    pub fn validate(&self) -> Result<(), Error> {
        const NON_ZERO: &str = "must be at least 1";
        let intervals = [
            ("runner.poll_interval_ms", self.runner.poll_interval_ms),
            ("runner.poll_timeout_ms", self.runner.poll_timeout_ms),
            ("sync.status_interval_ms", self.sync.status_interval_ms),
        ];
        if let Some((field, value)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::out_of_range(field, value, NON_ZERO).into());
        }
        if self.runner.timeout_multiplier < 1.0 {
            return Err(ConfigError::out_of_range(
                "runner.timeout_multiplier",
                self.runner.timeout_multiplier,
                "must be at least 1.0",
            )
            .into());
        }
        if self.runner.estimate_window == 0 {
            return Err(ConfigError::out_of_range("runner.estimate_window", 0, NON_ZERO).into());
        }
        if self.sync.chunk_size == 0 {
            return Err(ConfigError::out_of_range("sync.chunk_size", 0, NON_ZERO).into());
        }
        if self.sync.channel_depth == 0 {
            return Err(ConfigError::out_of_range("sync.channel_depth", 0, NON_ZERO).into());
        }
        Ok(())
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        // REFURB_OUTPUT
        if let Ok(output) = std::env::var("REFURB_OUTPUT") {
            self.general.default_output = match output.as_str() {
                "plain" => OutputFormat::Plain,
                "tty" => OutputFormat::Tty,
                "json" => OutputFormat::Json,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "REFURB_OUTPUT".to_string(),
                        value: output,
                    }
                    .into())
                }
            };
        }

        // REFURB_COLOR
        if let Ok(color) = std::env::var("REFURB_COLOR") {
            self.general.color = match color.as_str() {
                "always" => ColorChoice::Always,
                "auto" => ColorChoice::Auto,
                "never" => ColorChoice::Never,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "REFURB_COLOR".to_string(),
                        value: color,
                    }
                    .into())
                }
            };
        }

        // REFURB_CHUNK_SIZE
        if let Ok(size) = std::env::var("REFURB_CHUNK_SIZE") {
            self.sync.chunk_size = size.parse().map_err(|_| ConfigError::InvalidValue {
                field: "REFURB_CHUNK_SIZE".to_string(),
                value: size,
            })?;
        }

        // REFURB_TIMEOUT_MULTIPLIER
        if let Ok(mult) = std::env::var("REFURB_TIMEOUT_MULTIPLIER") {
            self.runner.timeout_multiplier =
                mult.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "REFURB_TIMEOUT_MULTIPLIER".to_string(),
                    value: mult,
                })?;
        }

        // REFURB_PARTCLONE
        if let Ok(prefix) = std::env::var("REFURB_PARTCLONE") {
            self.tools.partclone_prefix = prefix;
        }

        self.validate()
    }

    /// Mount point used for partition `number` of a run
    #[must_use]
    pub fn mount_point(run_tag: &str, number: u32) -> PathBuf {
        PathBuf::from(constants::MOUNT_ROOT).join(format!("{run_tag}-{number}"))
    }
}
