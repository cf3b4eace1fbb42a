//! Remote transports and the registry that resolves them by target name.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use pressroom_core::config::{TARGET_AWS, TARGET_SFTP};
use pressroom_core::DeploymentSettings;

use crate::error::DeployError;
use crate::snapshot::FileTreeSnapshot;

pub mod memory;
pub mod object_storage;
pub mod sftp;

pub use memory::{MemoryTransport, TransportEvent};
pub use object_storage::ObjectStorageTransport;
pub use sftp::SftpTransport;

/// How a transport's plan is computed from the two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Minimal upload/update/remove set by timestamp.
    Diff,
    /// Remove every remote path, then upload every local one.
    Replace,
}

/// A connection to one deployment target.
///
/// Used by a single session: `connect`, then any number of `list` / `put` /
/// `remove` calls, then `finish` (success only) and `disconnect`.
#[async_trait]
pub trait RemoteTransport: Send {
    fn strategy(&self) -> SyncStrategy;

    /// Human-readable target label for logs, e.g. `sftp://host:22/path`.
    fn describe(&self) -> String;

    async fn connect(&mut self) -> Result<(), DeployError>;

    /// Snapshot of the remote tree relative to the target's base path.
    async fn list(&mut self) -> Result<FileTreeSnapshot, DeployError>;

    /// Write `contents` at `path`, creating missing parent directories.
    /// The session overwrites the `kind` of any returned
    /// [`DeployError::Write`] with the operation it was applying.
    async fn put(&mut self, path: &str, contents: Vec<u8>) -> Result<(), DeployError>;

    async fn remove(&mut self, path: &str) -> Result<(), DeployError>;

    async fn remove_all(&mut self, paths: &[String]) -> Result<(), DeployError> {
        for path in paths {
            self.remove(path).await?;
        }
        Ok(())
    }

    /// Post-apply step, run once every operation has succeeded.
    async fn finish(&mut self) -> Result<(), DeployError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DeployError>;
}

/// Builds a transport for one deployment's settings.
pub type TransportFactory =
    Box<dyn Fn(&DeploymentSettings) -> Result<Box<dyn RemoteTransport>, DeployError> + Send + Sync>;

/// Target-name → factory map, built once at startup and passed to sessions.
#[derive(Default)]
pub struct TransportRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `sftp` and `aws` targets.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TARGET_SFTP, |settings| {
            let sftp = settings
                .sftp
                .clone()
                .ok_or_else(|| DeployError::MissingSettings {
                    target: TARGET_SFTP.to_string(),
                })?;
            Ok(Box::new(SftpTransport::new(sftp)) as Box<dyn RemoteTransport>)
        });
        registry.register(TARGET_AWS, |settings| {
            let aws = settings
                .aws
                .clone()
                .ok_or_else(|| DeployError::MissingSettings {
                    target: TARGET_AWS.to_string(),
                })?;
            Ok(Box::new(ObjectStorageTransport::new(aws)) as Box<dyn RemoteTransport>)
        });
        registry
    }

    /// Register (or replace) the factory for `target`.
    pub fn register<F>(&mut self, target: impl Into<String>, factory: F)
    where
        F: Fn(&DeploymentSettings) -> Result<Box<dyn RemoteTransport>, DeployError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(target.into(), Box::new(factory));
    }

    pub fn contains(&self, target: &str) -> bool {
        self.factories.contains_key(target)
    }

    /// Build a fresh transport for `settings.target`.
    pub fn resolve(
        &self,
        settings: &DeploymentSettings,
    ) -> Result<Box<dyn RemoteTransport>, DeployError> {
        let factory = self
            .factories
            .get(&settings.target)
            .ok_or_else(|| DeployError::UnknownTarget(settings.target.clone()))?;
        factory(settings)
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut targets: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        targets.sort_unstable();
        f.debug_struct("TransportRegistry")
            .field("targets", &targets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(target: &str) -> DeploymentSettings {
        DeploymentSettings {
            enabled: true,
            target: target.to_string(),
            ..DeploymentSettings::default()
        }
    }

    #[test]
    fn unknown_target_is_rejected() {
        let registry = TransportRegistry::with_defaults();
        let err = registry.resolve(&settings("ftp")).err().expect("error");
        assert!(matches!(err, DeployError::UnknownTarget(ref t) if t == "ftp"), "got: {err}");
    }

    #[test]
    fn known_target_without_section_is_missing_settings() {
        let registry = TransportRegistry::with_defaults();
        let err = registry.resolve(&settings("sftp")).err().expect("error");
        assert!(matches!(err, DeployError::MissingSettings { .. }), "got: {err}");
        let err = registry.resolve(&settings("aws")).err().expect("error");
        assert!(matches!(err, DeployError::MissingSettings { .. }), "got: {err}");
    }

    #[test]
    fn registered_factory_is_used() {
        let mut registry = TransportRegistry::new();
        let remote = MemoryTransport::new(SyncStrategy::Diff);
        let shared = remote.clone();
        registry.register("memory", move |_| Ok(Box::new(shared.clone()) as Box<dyn RemoteTransport>));
        assert!(registry.contains("memory"));

        let transport = registry.resolve(&settings("memory")).expect("resolve");
        assert_eq!(transport.strategy(), SyncStrategy::Diff);
        assert_eq!(format!("{registry:?}"), "TransportRegistry { targets: [\"memory\"] }");
    }
}
