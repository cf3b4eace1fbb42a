//! Error types for pressroom-deploy.

use std::fmt;

use thiserror::Error;

use crate::diff::OperationKind;

/// Boxed source error from a transport backend (SSH, SFTP, S3, CloudFront).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// All errors that can arise while snapshotting, planning or applying a deployment.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Connecting or authenticating to the remote failed.
    #[error("connection to {target} failed: {source}")]
    Connection {
        target: String,
        #[source]
        source: BoxError,
    },

    /// Enumerating a local or remote tree failed. The snapshot is discarded.
    #[error("failed to enumerate {path}: {source}")]
    Traversal {
        path: String,
        #[source]
        source: BoxError,
    },

    /// A single upload, update or removal failed.
    #[error("{kind} of {path} failed: {source}")]
    Write {
        path: String,
        kind: OperationKind,
        #[source]
        source: BoxError,
    },

    /// CDN invalidation after an object-storage deployment failed.
    #[error("invalidation of distribution {distribution} failed: {source}")]
    Invalidation {
        distribution: String,
        #[source]
        source: BoxError,
    },

    #[error("unknown deployment target '{0}'")]
    UnknownTarget(String),

    /// The settings have no section for the selected target.
    #[error("deployment target '{target}' has no settings section")]
    MissingSettings { target: String },

    #[error("invalid transport configuration: {0}")]
    Config(String),
}

impl DeployError {
    /// Re-tag a [`DeployError::Write`] with the operation that was running.
    /// Transports only see a path and bytes, so they cannot tell an upload
    /// from an update. Other variants pass through unchanged.
    pub(crate) fn with_operation(self, operation: OperationKind) -> Self {
        match self {
            DeployError::Write { path, source, .. } => DeployError::Write {
                path,
                kind: operation,
                source,
            },
            other => other,
        }
    }
}

/// Convenience constructor for [`DeployError::Connection`].
pub(crate) fn connection_err(
    target: impl fmt::Display,
    source: impl Into<BoxError>,
) -> DeployError {
    DeployError::Connection {
        target: target.to_string(),
        source: source.into(),
    }
}

/// Convenience constructor for [`DeployError::Traversal`].
pub(crate) fn traversal_err(path: impl fmt::Display, source: impl Into<BoxError>) -> DeployError {
    DeployError::Traversal {
        path: path.to_string(),
        source: source.into(),
    }
}

/// Convenience constructor for [`DeployError::Write`].
pub(crate) fn write_err(
    path: impl fmt::Display,
    kind: OperationKind,
    source: impl Into<BoxError>,
) -> DeployError {
    DeployError::Write {
        path: path.to_string(),
        kind,
        source: source.into(),
    }
}
