// ============================================================================
// File: packages/vm-backup/src/config/errors.rs
// ----------------------------------------------------------------------------
// Configuration error types
// ============================================================================

use std::path::PathBuf;

/// Errors raised while loading or validating the backup configuration
///
/// All of them are fatal and surface before any connection is made.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML or has unknown keys
    #[error("Failed to parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The `[config]` table is missing
    #[error("No section: '{section}'")]
    MissingSection { section: &'static str },

    /// A required setting is absent
    #[error("No option '{key}' in section: 'config'")]
    MissingSetting { key: &'static str },

    /// A setting is present but unusable
    #[error("Invalid value for '{key}': {details}")]
    InvalidSetting { key: &'static str, details: String },
}

impl ConfigError {
    pub(crate) fn invalid<D: Into<String>>(key: &'static str, details: D) -> Self {
        Self::InvalidSetting {
            key,
            details: details.into(),
        }
    }
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;
