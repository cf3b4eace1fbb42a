//! Local-vs-remote tree reconciliation.
//!
//! [`diff`] is pure: the same two snapshots always produce the same plan.
//! Local-side operations come first in path order, then removals in path
//! order.

use std::fmt;

use crate::snapshot::{FileRecord, FileTreeSnapshot};

/// What a [`FileOperation`] does to the remote path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Path exists only locally.
    Upload,
    /// Path exists on both sides and the local copy is strictly newer.
    Update,
    /// Path exists only remotely.
    Remove,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Upload => write!(f, "upload"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Remove => write!(f, "remove"),
        }
    }
}

/// One planned change to the remote tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOperation {
    path: String,
    source: Option<FileRecord>,
    kind: OperationKind,
}

impl FileOperation {
    pub(crate) fn upload(record: &FileRecord) -> Self {
        Self {
            path: record.path().to_owned(),
            source: Some(record.clone()),
            kind: OperationKind::Upload,
        }
    }

    pub(crate) fn update(record: &FileRecord) -> Self {
        Self {
            path: record.path().to_owned(),
            source: Some(record.clone()),
            kind: OperationKind::Update,
        }
    }

    pub(crate) fn remove(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            source: None,
            kind: OperationKind::Remove,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The local record to copy; `None` for removals.
    pub fn source(&self) -> Option<&FileRecord> {
        self.source.as_ref()
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.path)
    }
}

/// Plan the minimal set of operations that makes `remote` match `local`.
///
/// Equal timestamps produce no operation; a remote copy newer than the local
/// one is left alone.
pub fn diff(local: &FileTreeSnapshot, remote: &FileTreeSnapshot) -> Vec<FileOperation> {
    let mut operations = Vec::new();

    for record in local {
        match remote.get(record.path()) {
            None => operations.push(FileOperation::upload(record)),
            Some(existing) if record.modified_at() > existing.modified_at() => {
                operations.push(FileOperation::update(record))
            }
            Some(_) => {}
        }
    }

    for path in remote.paths() {
        if !local.contains(path) {
            operations.push(FileOperation::remove(path));
        }
    }

    operations
}

/// Bulk-replace plan: remove everything remote, then upload everything local.
pub fn replace_all(local: &FileTreeSnapshot, remote: &FileTreeSnapshot) -> Vec<FileOperation> {
    remote
        .paths()
        .map(FileOperation::remove)
        .chain(local.iter().map(FileOperation::upload))
        .collect()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
