use std::path::PathBuf;

use thiserror::Error;

use pressroom_core::{Environment, SiteName};
use pressroom_deploy::DeployError;

/// Error surface for the daemon runtime and its socket protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] pressroom_core::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

/// Lookup failures in the [`BuildRegistry`](crate::builds::BuildRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("no build running for site '{0}'")]
    NotFound(SiteName),
}

/// Failures running a site generator.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The generator exited unsuccessfully; `output` is its combined stdout and stderr.
    #[error("'{program}' exited with {status}")]
    Failed {
        program: String,
        status: String,
        output: String,
    },

    /// The build was cancelled and the child process killed.
    #[error("build cancelled")]
    Cancelled,
}

/// Failures of one publish cycle.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("unknown site '{0}'")]
    UnknownSite(SiteName),

    /// A newer publish for the same site replaced this one.
    #[error("publish of '{0}' superseded by a newer request")]
    Superseded(SiteName),

    #[error("{environment} build of '{site}' failed: {source}")]
    Build {
        site: SiteName,
        environment: Environment,
        #[source]
        source: ProcessError,
    },

    #[error("{environment} deployment of '{site}' failed: {source}")]
    Deploy {
        site: SiteName,
        environment: Environment,
        #[source]
        source: DeployError,
    },
}
