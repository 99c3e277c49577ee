//! Configuration error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ConfigError {
    /// No per-user configuration directory on this system
    #[error("cannot determine the configuration directory")]
    NoConfigDir,

    #[error("config file not found: {path}")]
    NotFound { path: String },

    #[error("cannot read config file {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("cannot parse config file {path}: {message}")]
    ParseError { path: String, message: String },

    /// An environment override that does not parse
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// A well-formed value the runner cannot work with
    #[error("{field} = {value} is out of range: {requirement}")]
    OutOfRange {
        field: String,
        value: String,
        requirement: String,
    },
}

impl ConfigError {
    #[must_use]
    pub fn out_of_range(field: &str, value: impl ToString, requirement: &str) -> Self {
        Self::OutOfRange {
            field: field.to_string(),
            value: value.to_string(),
            requirement: requirement.to_string(),
        }
    }
}

impl UserFacingError for ConfigError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::NoConfigDir => Some("Pass --config with an explicit file path."),
            Self::NotFound { .. } => {
                Some("Provide a configuration file or drop --config to use defaults.")
            }
            Self::Unreadable { .. } => Some("Check the file's permissions and retry."),
            Self::ParseError { .. } => Some("Fix the TOML syntax reported above and retry."),
            Self::InvalidValue { .. } => {
                Some("Correct or unset the REFURB_* environment variable and retry.")
            }
            Self::OutOfRange { .. } => Some("Fix the configuration value and retry the command."),
        }
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NoConfigDir => "config.no_config_dir",
            Self::NotFound { .. } => "config.not_found",
            Self::Unreadable { .. } => "config.unreadable",
            Self::ParseError { .. } => "config.parse_error",
            Self::InvalidValue { .. } => "config.invalid_value",
            Self::OutOfRange { .. } => "config.out_of_range",
        };
        Some(code)
    }
}
