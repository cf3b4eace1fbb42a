//! One deployment of one site environment to one remote target.
//!
//! ## Flow
//!
//! 1. Disabled settings return [`DeployReport::skipped`] before anything else.
//! 2. Resolve the transport by `settings.target`.
//! 3. Snapshot the local output directory.
//! 4. Connect, list the remote tree and plan by the transport's strategy.
//! 5. Apply every operation in order, then `finish`.
//! 6. Disconnect, on every exit path including panics.

use std::fmt;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, warn};

use pressroom_core::{DeploymentSettings, Environment, Site, SiteName};

use crate::diff::{diff, replace_all, FileOperation, OperationKind};
use crate::error::{write_err, DeployError};
use crate::snapshot::{local_snapshot, FileTreeSnapshot};
use crate::transport::{RemoteTransport, SyncStrategy, TransportRegistry};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Counts of what a deployment did (or, for a plan, would do).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub site: SiteName,
    pub environment: Environment,
    pub target: String,
    pub uploaded: usize,
    pub updated: usize,
    pub removed: usize,
    /// The deployment is disabled; nothing was contacted.
    pub skipped: bool,
}

impl DeployReport {
    pub fn skipped(site: &SiteName, environment: Environment) -> Self {
        Self {
            site: site.clone(),
            environment,
            target: String::new(),
            uploaded: 0,
            updated: 0,
            removed: 0,
            skipped: true,
        }
    }

    fn from_operations(
        site: &SiteName,
        environment: Environment,
        target: String,
        operations: &[FileOperation],
    ) -> Self {
        let count = |kind: OperationKind| operations.iter().filter(|op| op.kind() == kind).count();
        Self {
            site: site.clone(),
            environment,
            target,
            uploaded: count(OperationKind::Upload),
            updated: count(OperationKind::Update),
            removed: count(OperationKind::Remove),
            skipped: false,
        }
    }

    pub fn total(&self) -> usize {
        self.uploaded + self.updated + self.removed
    }
}

impl fmt::Display for DeployReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped {
            return write!(f, "{} ({}): deployment disabled", self.site, self.environment);
        }
        write!(
            f,
            "{} ({}) -> {}: {} uploaded, {} updated, {} removed",
            self.site, self.environment, self.target, self.uploaded, self.updated, self.removed
        )
    }
}

/// A computed but unapplied deployment.
#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub report: DeployReport,
    pub strategy: Option<SyncStrategy>,
    pub operations: Vec<FileOperation>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeploymentSession {
    transports: Arc<TransportRegistry>,
}

impl DeploymentSession {
    pub fn new(transports: Arc<TransportRegistry>) -> Self {
        Self { transports }
    }

    /// Reconcile the remote target with `site`'s output for `environment`.
    pub async fn deploy(
        &self,
        site: &Site,
        environment: Environment,
        settings: &DeploymentSettings,
    ) -> Result<DeployReport, DeployError> {
        self.run(site, environment, settings, true)
            .await
            .map(|plan| plan.report)
    }

    /// Same as [`deploy`](Self::deploy) up to planning; nothing is written.
    pub async fn plan(
        &self,
        site: &Site,
        environment: Environment,
        settings: &DeploymentSettings,
    ) -> Result<DeployPlan, DeployError> {
        self.run(site, environment, settings, false).await
    }

    async fn run(
        &self,
        site: &Site,
        environment: Environment,
        settings: &DeploymentSettings,
        apply: bool,
    ) -> Result<DeployPlan, DeployError> {
        if !settings.enabled {
            debug!(site = %site.name, %environment, "deployment disabled; skipping");
            return Ok(DeployPlan {
                report: DeployReport::skipped(&site.name, environment),
                strategy: None,
                operations: Vec::new(),
            });
        }

        let mut transport = self.transports.resolve(settings)?;
        let source = site.output_dir(environment);
        let local = local_snapshot(&source).await?;
        let target = transport.describe();
        info!(
            site = %site.name,
            %environment,
            target = %target,
            files = local.len(),
            apply,
            "starting deployment"
        );

        let outcome = AssertUnwindSafe(sync(transport.as_mut(), &local, &source, apply))
            .catch_unwind()
            .await;
        let disconnected = transport.disconnect().await;

        let (strategy, operations) = match outcome {
            Err(panic) => {
                if let Err(err) = &disconnected {
                    warn!(target = %target, error = %err, "disconnect after panic failed");
                }
                resume_unwind(panic)
            }
            Ok(Err(err)) => {
                if let Err(disconnect_err) = &disconnected {
                    warn!(target = %target, error = %disconnect_err, "disconnect after failure failed");
                }
                return Err(err);
            }
            Ok(Ok(result)) => result,
        };
        disconnected?;

        let report = DeployReport::from_operations(&site.name, environment, target, &operations);
        if apply {
            info!(
                site = %site.name,
                %environment,
                uploaded = report.uploaded,
                updated = report.updated,
                removed = report.removed,
                "deployment complete"
            );
        }
        Ok(DeployPlan {
            report,
            strategy: Some(strategy),
            operations,
        })
    }
}

/// Connect, plan and (when `apply`) execute the plan. The caller disconnects.
async fn sync(
    transport: &mut dyn RemoteTransport,
    local: &FileTreeSnapshot,
    source: &Path,
    apply: bool,
) -> Result<(SyncStrategy, Vec<FileOperation>), DeployError> {
    transport.connect().await?;
    let remote = transport.list().await?;
    let strategy = transport.strategy();
    let operations = match strategy {
        SyncStrategy::Diff => diff(local, &remote),
        SyncStrategy::Replace => replace_all(local, &remote),
    };
    if !apply {
        return Ok((strategy, operations));
    }

    if strategy == SyncStrategy::Replace {
        let removals: Vec<String> = operations
            .iter()
            .filter(|op| op.kind() == OperationKind::Remove)
            .map(|op| op.path().to_owned())
            .collect();
        if !removals.is_empty() {
            transport.remove_all(&removals).await?;
            debug!(count = removals.len(), "removed remote files");
        }
    }

    for operation in &operations {
        match operation.kind() {
            OperationKind::Remove if strategy == SyncStrategy::Replace => {}
            OperationKind::Remove => {
                transport.remove(operation.path()).await?;
                debug!(path = operation.path(), "removed");
            }
            kind @ (OperationKind::Upload | OperationKind::Update) => {
                let contents = tokio::fs::read(source.join(operation.path()))
                    .await
                    .map_err(|e| write_err(operation.path(), kind, e))?;
                transport
                    .put(operation.path(), contents)
                    .await
                    .map_err(|err| err.with_operation(kind))?;
                debug!(path = operation.path(), %kind, "written");
            }
        }
    }

    transport.finish().await?;
    Ok((strategy, operations))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_display() {
        let report = DeployReport {
            site: SiteName::from("blog"),
            environment: Environment::Production,
            target: "memory://".to_string(),
            uploaded: 2,
            updated: 1,
            removed: 0,
            skipped: false,
        };
        assert_eq!(
            report.to_string(),
            "blog (production) -> memory://: 2 uploaded, 1 updated, 0 removed"
        );
        assert_eq!(report.total(), 3);

        let skipped = DeployReport::skipped(&SiteName::from("blog"), Environment::Draft);
        assert_eq!(skipped.to_string(), "blog (draft): deployment disabled");
    }
}
