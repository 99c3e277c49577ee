//! Fixed paths not exposed through configuration

/// Directory under which target partitions are mounted during a run
pub const MOUNT_ROOT: &str = "/mnt/refurb";

/// Directory name under the user config dir
pub const CONFIG_DIR_NAME: &str = "refurb";

/// Config file name inside [`CONFIG_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";
