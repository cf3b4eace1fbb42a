//! One publish cycle: build every environment of a site, then deploy
//! production followed by drafts.
//!
//! A publish registers its build before doing anything else. When that
//! displaces an older build for the same site, the new publish waits for the
//! old one to wind down so two generators never run against one site root.
//! Deployments are not interrupted; a publish cancelled mid-deploy finishes
//! the deployment in progress, skips the rest and reports itself superseded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use pressroom_core::{Config, Environment, Site, SiteName};
use pressroom_deploy::{DeployReport, DeploymentSession};

use crate::builds::{BuildGuard, BuildHandle, BuildRegistry};
use crate::error::{BuildError, ProcessError, PublishError};
use crate::generator::{build_site, BuildOptions};

/// Result row for one deployment of a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentSummary {
    pub environment: Environment,
    pub target: String,
    pub uploaded: usize,
    pub updated: usize,
    pub removed: usize,
    pub skipped: bool,
}

impl From<&DeployReport> for DeploymentSummary {
    fn from(report: &DeployReport) -> Self {
        Self {
            environment: report.environment,
            target: report.target.clone(),
            uploaded: report.uploaded,
            updated: report.updated,
            removed: report.removed,
            skipped: report.skipped,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishSummary {
    pub site: String,
    pub build_id: u64,
    pub built: Vec<Environment>,
    pub deployments: Vec<DeploymentSummary>,
    pub duration_ms: u128,
}

#[derive(Debug, Clone)]
pub struct Publisher {
    sites: HashMap<SiteName, Site>,
    builds: Arc<BuildRegistry>,
    deployments: DeploymentSession,
    log_dir: Option<PathBuf>,
}

impl Publisher {
    pub fn new(config: &Config, builds: Arc<BuildRegistry>, deployments: DeploymentSession) -> Self {
        let sites = config
            .sites
            .iter()
            .map(|site| (site.name.clone(), site.clone()))
            .collect();
        Self {
            sites,
            builds,
            deployments,
            log_dir: None,
        }
    }

    /// Keep the last generator output per site environment under `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn builds(&self) -> &Arc<BuildRegistry> {
        &self.builds
    }

    /// Configured site names, sorted.
    pub fn site_names(&self) -> Vec<SiteName> {
        let mut names: Vec<SiteName> = self.sites.keys().cloned().collect();
        names.sort();
        names
    }

    /// Cancel the site's running build, if any. The next publish for the
    /// site still waits for it to stop.
    pub fn cancel(&self, site: &SiteName) -> Result<BuildHandle, BuildError> {
        let handle = self.builds.safely_remove(site)?;
        info!(site = %site, build = handle.id(), "build cancelled on request");
        Ok(handle)
    }

    /// Rebuild and redeploy `name`, superseding any publish already running
    /// for it.
    pub async fn publish(
        &self,
        name: &SiteName,
        use_cache: bool,
    ) -> Result<PublishSummary, PublishError> {
        let site = self
            .sites
            .get(name)
            .ok_or_else(|| PublishError::UnknownSite(name.clone()))?;
        let started = Instant::now();

        let handle = BuildHandle::new(name.clone());
        let displaced = self.builds.add(handle.clone());
        let _guard = BuildGuard::new(self.builds.clone(), handle.clone());
        if let Some(previous) = displaced {
            info!(site = %name, previous = previous.id(), "waiting for superseded build to stop");
            previous.completed().await;
        }
        if handle.is_cancelled() {
            return Err(PublishError::Superseded(name.clone()));
        }

        let environments = site.environments();
        for &environment in &environments {
            let options = BuildOptions::for_environment(site, environment, use_cache);
            let result = build_site(site, &options, handle.cancel_token()).await;
            self.write_build_log(name, environment, &result).await;
            match result {
                Ok(_) => {}
                Err(ProcessError::Cancelled) => {
                    return Err(PublishError::Superseded(name.clone()));
                }
                Err(source) => {
                    return Err(PublishError::Build {
                        site: name.clone(),
                        environment,
                        source,
                    });
                }
            }
        }

        let mut deployments = Vec::with_capacity(environments.len());
        for &environment in &environments {
            if handle.is_cancelled() {
                return Err(PublishError::Superseded(name.clone()));
            }
            let report = self
                .deployments
                .deploy(site, environment, site.deployment(environment))
                .await
                .map_err(|source| PublishError::Deploy {
                    site: name.clone(),
                    environment,
                    source,
                })?;
            info!("{report}");
            deployments.push(DeploymentSummary::from(&report));
        }
        if handle.is_cancelled() {
            return Err(PublishError::Superseded(name.clone()));
        }

        Ok(PublishSummary {
            site: name.0.clone(),
            build_id: handle.id(),
            built: environments,
            deployments,
            duration_ms: started.elapsed().as_millis(),
        })
    }

    async fn write_build_log(
        &self,
        site: &SiteName,
        environment: Environment,
        result: &Result<crate::generator::BuildOutput, ProcessError>,
    ) {
        let Some(dir) = &self.log_dir else {
            return;
        };
        let contents = match result {
            Ok(build) => build.output.clone(),
            Err(ProcessError::Failed { output, .. }) => output.clone(),
            Err(err) => err.to_string(),
        };
        let path = build_log_path(dir, site, environment);
        if let Err(err) = tokio::fs::write(&path, contents).await {
            warn!(path = %path.display(), error = %err, "failed to write build log");
        }
    }
}

pub fn build_log_path(dir: &Path, site: &SiteName, environment: Environment) -> PathBuf {
    dir.join(format!("{site}.{environment}.log"))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
