//! File tree snapshots.
//!
//! A [`FileTreeSnapshot`] maps `/`-separated relative paths to the
//! [`FileRecord`] found there. Only non-directory entries are recorded;
//! directories are traversed but never emitted.
//!
//! ## Local enumeration
//!
//! [`local_snapshot`] walks the tree on a blocking task and hands discovered
//! paths to the async side over a bounded channel:
//!
//! 1. The walker sends `Ok(path)` per file, or one `Err` and stops.
//! 2. The consumer reads metadata for each path.
//! 3. On any error the consumer cancels the walker, drops the receiver and
//!    joins the walker task before returning.

use std::collections::btree_map::{self, BTreeMap};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{traversal_err, DeployError};

/// Paths buffered between the walker and the metadata reader.
const WALK_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// FileRecord
// ---------------------------------------------------------------------------

/// One entry of a file tree. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    path: String,
    size: u64,
    modified_at: DateTime<Utc>,
    is_directory: bool,
}

impl FileRecord {
    /// A regular file. `modified_at` is truncated to whole seconds so local
    /// and SFTP timestamps compare at the same resolution.
    pub fn file(path: impl Into<String>, size: u64, modified_at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size,
            modified_at: modified_at.trunc_subsecs(0),
            is_directory: false,
        }
    }

    pub fn directory(path: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            modified_at: modified_at.trunc_subsecs(0),
            is_directory: true,
        }
    }

    /// `/`-separated path relative to the tree root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }
}

// ---------------------------------------------------------------------------
// FileTreeSnapshot
// ---------------------------------------------------------------------------

/// Path-keyed set of [`FileRecord`]s, iterated in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTreeSnapshot {
    files: BTreeMap<String, FileRecord>,
}

impl FileTreeSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing (and returning) any record at the same path.
    pub fn insert(&mut self, record: FileRecord) -> Option<FileRecord> {
        self.files.insert(record.path.clone(), record)
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> btree_map::Values<'_, String, FileRecord> {
        self.files.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

impl FromIterator<FileRecord> for FileTreeSnapshot {
    fn from_iter<I: IntoIterator<Item = FileRecord>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for record in iter {
            snapshot.insert(record);
        }
        snapshot
    }
}

impl<'a> IntoIterator for &'a FileTreeSnapshot {
    type Item = &'a FileRecord;
    type IntoIter = btree_map::Values<'a, String, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Join a relative path's components with `/` regardless of host separator.
pub fn to_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ---------------------------------------------------------------------------
// Local enumeration
// ---------------------------------------------------------------------------

/// Snapshot every file under `root`. Any error aborts the whole walk.
pub async fn local_snapshot(root: &Path) -> Result<FileTreeSnapshot, DeployError> {
    local_snapshot_with_cancel(root, &CancellationToken::new()).await
}

/// [`local_snapshot`] that stops early once `cancel` fires.
pub async fn local_snapshot_with_cancel(
    root: &Path,
    cancel: &CancellationToken,
) -> Result<FileTreeSnapshot, DeployError> {
    let walker_cancel = cancel.child_token();
    let (tx, mut rx) = mpsc::channel(WALK_CHANNEL_CAPACITY);
    let walk_root = root.to_path_buf();
    let token = walker_cancel.clone();
    let walker = tokio::task::spawn_blocking(move || walk(&walk_root, &tx, &token));

    let mut snapshot = FileTreeSnapshot::new();
    let mut failure = None;
    while let Some(item) = rx.recv().await {
        match item {
            Ok(path) => match read_record(root, &path).await {
                Ok(record) => {
                    snapshot.insert(record);
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            },
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    walker_cancel.cancel();
    drop(rx);
    walker
        .await
        .map_err(|e| traversal_err(root.display(), e))?;

    match failure {
        Some(err) => Err(err),
        None => {
            debug!(root = %root.display(), files = snapshot.len(), "local snapshot complete");
            Ok(snapshot)
        }
    }
}

async fn read_record(root: &Path, path: &Path) -> Result<FileRecord, DeployError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| traversal_err(path.display(), e))?;
    let modified = metadata
        .modified()
        .map_err(|e| traversal_err(path.display(), e))?;
    let relative = path.strip_prefix(root).unwrap_or(path);
    Ok(FileRecord::file(
        to_key(relative),
        metadata.len(),
        DateTime::<Utc>::from(modified),
    ))
}

/// Depth-first walk on a blocking thread. Returns once the tree is exhausted,
/// an error has been sent, the receiver is gone, or `cancel` fires.
///
/// Symlinked directories are followed, but each real directory is entered at
/// most once so link cycles terminate.
fn walk(root: &Path, tx: &mpsc::Sender<Result<PathBuf, DeployError>>, cancel: &CancellationToken) {
    let mut visited = HashSet::new();
    if let Ok(canonical) = std::fs::canonicalize(root) {
        visited.insert(canonical);
    }
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                let _ = tx.blocking_send(Err(traversal_err(dir.display(), err)));
                return;
            }
        };
        for entry in entries {
            if cancel.is_cancelled() {
                let _ = tx.blocking_send(Err(traversal_err(
                    root.display(),
                    std::io::Error::new(std::io::ErrorKind::Interrupted, "walk cancelled"),
                )));
                return;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let _ = tx.blocking_send(Err(traversal_err(dir.display(), err)));
                    return;
                }
            };
            let path = entry.path();
            let is_dir = match entry.file_type() {
                Ok(ft) if ft.is_symlink() => path.is_dir(),
                Ok(ft) => ft.is_dir(),
                Err(err) => {
                    let _ = tx.blocking_send(Err(traversal_err(path.display(), err)));
                    return;
                }
            };
            if is_dir {
                match std::fs::canonicalize(&path) {
                    Ok(canonical) if !visited.insert(canonical.clone()) => {
                        debug!(path = %path.display(), "skipping already visited directory");
                    }
                    Ok(_) => pending.push(path),
                    Err(err) => {
                        let _ = tx.blocking_send(Err(traversal_err(path.display(), err)));
                        return;
                    }
                }
            } else if tx.blocking_send(Ok(path)).is_err() {
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
