//! Errors raised while loading, overriding or saving zonesync settings

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("cannot write config file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("{} is not a valid zonesync config: {source}", path.display())]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("cannot encode config as TOML: {0}")]
    Encode(#[from] toml::ser::Error),

    /// A `ZONESYNC_*` variable whose value does not parse
    #[error("{var}={value:?}: {reason}")]
    Env { var: String, value: String, reason: String },

    /// A setting outside its allowed range, named by its `section.key` path
    #[error("{field} {requirement}")]
    Invalid { field: &'static str, requirement: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, requirement: impl Into<String>) -> Self {
        ConfigError::Invalid { field, requirement: requirement.into() }
    }
}
