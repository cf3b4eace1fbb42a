//! In-process transport backed by a shared map.
//!
//! Clones share one remote tree, so a test (or an embedding application) can
//! hand a clone to a [`TransportRegistry`](super::TransportRegistry) factory
//! and inspect the result afterwards.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::diff::OperationKind;
use crate::error::{connection_err, write_err, DeployError};
use crate::snapshot::{FileRecord, FileTreeSnapshot};
use crate::transport::{RemoteTransport, SyncStrategy};

/// Calls observed by a [`MemoryTransport`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connect,
    List,
    Put(String),
    Remove(String),
    RemoveAll(Vec<String>),
    Finish,
    Disconnect,
}

#[derive(Debug, Clone)]
struct StoredFile {
    contents: Vec<u8>,
    modified_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, StoredFile>,
    events: Vec<TransportEvent>,
    connected: bool,
    refuse_connect: bool,
    failing_paths: HashSet<String>,
    panicking_paths: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    strategy: SyncStrategy,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new(strategy: SyncStrategy) -> Self {
        Self {
            strategy,
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Seed a remote file.
    pub fn with_file(self, path: &str, contents: &[u8], modified_at: DateTime<Utc>) -> Self {
        self.state().files.insert(
            path.to_owned(),
            StoredFile {
                contents: contents.to_vec(),
                modified_at,
            },
        );
        self
    }

    /// Make `connect` fail.
    pub fn refuse_connections(self) -> Self {
        self.state().refuse_connect = true;
        self
    }

    /// Make `put` / `remove` of `path` fail with a write error.
    pub fn fail_on(self, path: &str) -> Self {
        self.state().failing_paths.insert(path.to_owned());
        self
    }

    /// Make `put` of `path` panic.
    pub fn panic_on(self, path: &str) -> Self {
        self.state().panicking_paths.insert(path.to_owned());
        self
    }

    pub fn paths(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).map(|f| f.contents.clone())
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.state().events.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_connected(state: &MemoryState) -> Result<(), DeployError> {
        if state.connected {
            Ok(())
        } else {
            Err(connection_err("memory", "not connected"))
        }
    }
}

#[async_trait]
impl RemoteTransport for MemoryTransport {
    fn strategy(&self) -> SyncStrategy {
        self.strategy
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }

    async fn connect(&mut self) -> Result<(), DeployError> {
        let mut state = self.state();
        state.events.push(TransportEvent::Connect);
        if state.refuse_connect {
            return Err(connection_err("memory", "connection refused"));
        }
        state.connected = true;
        Ok(())
    }

    async fn list(&mut self) -> Result<FileTreeSnapshot, DeployError> {
        let mut state = self.state();
        Self::check_connected(&state)?;
        state.events.push(TransportEvent::List);
        Ok(state
            .files
            .iter()
            .map(|(path, file)| FileRecord::file(path.clone(), file.contents.len() as u64, file.modified_at))
            .collect())
    }

    async fn put(&mut self, path: &str, contents: Vec<u8>) -> Result<(), DeployError> {
        let mut state = self.state();
        Self::check_connected(&state)?;
        state.events.push(TransportEvent::Put(path.to_owned()));
        if state.panicking_paths.contains(path) {
            drop(state);
            panic!("memory transport: injected panic writing {path}");
        }
        if state.failing_paths.contains(path) {
            return Err(write_err(path, OperationKind::Upload, "injected write failure"));
        }
        state.files.insert(
            path.to_owned(),
            StoredFile {
                contents,
                modified_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn remove(&mut self, path: &str) -> Result<(), DeployError> {
        let mut state = self.state();
        Self::check_connected(&state)?;
        state.events.push(TransportEvent::Remove(path.to_owned()));
        if state.failing_paths.contains(path) {
            return Err(write_err(path, OperationKind::Remove, "injected remove failure"));
        }
        state.files.remove(path);
        Ok(())
    }

    async fn remove_all(&mut self, paths: &[String]) -> Result<(), DeployError> {
        let mut state = self.state();
        Self::check_connected(&state)?;
        state.events.push(TransportEvent::RemoveAll(paths.to_vec()));
        if let Some(path) = paths.iter().find(|p| state.failing_paths.contains(*p)) {
            return Err(write_err(path, OperationKind::Remove, "injected remove failure"));
        }
        for path in paths {
            state.files.remove(path);
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), DeployError> {
        self.state().events.push(TransportEvent::Finish);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DeployError> {
        let mut state = self.state();
        state.events.push(TransportEvent::Disconnect);
        state.connected = false;
        Ok(())
    }
}
