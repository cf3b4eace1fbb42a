//! Error types for pressroom-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Environment, SiteName};

/// All errors that can arise from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure reading or writing the config file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the file path and serde_yaml's line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.pressroom/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    #[error("site '{name}' is defined more than once")]
    DuplicateSite { name: SiteName },

    #[error("site '{name}' has an empty root_dir")]
    EmptyRoot { name: SiteName },

    /// An enabled deployment names a target whose settings section is absent.
    #[error("site '{site}' {environment} deployment targets '{target}' but has no '{target}' section")]
    MissingTargetSettings {
        site: SiteName,
        environment: Environment,
        target: String,
    },

    #[error("site '{site}' {environment} deployment is enabled but has no target")]
    MissingTarget {
        site: SiteName,
        environment: Environment,
    },
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
