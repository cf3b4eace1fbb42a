//! `pressroom deploy <site> [--draft] [--dry-run]`
//!
//! Runs a deployment in-process against whatever the site's output directory
//! currently holds. The daemon is not involved and no build is started.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use pressroom_core::{Environment, SiteName};
use pressroom_deploy::{DeployPlan, DeploymentSession, OperationKind, TransportRegistry};

use super::load_config;

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Site to deploy.
    pub site: String,

    /// Deploy the draft output to the drafts target.
    #[arg(long)]
    pub draft: bool,

    /// Connect and list the remote, print the plan, change nothing.
    #[arg(long)]
    pub dry_run: bool,
}

impl DeployArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let config = load_config(config_path)?;
        let site = config
            .site(&SiteName::from(self.site.as_str()))
            .with_context(|| format!("unknown site '{}'", self.site))?;
        let environment = if self.draft {
            Environment::Draft
        } else {
            Environment::Production
        };
        let settings = site.deployment(environment);

        let session = DeploymentSession::new(Arc::new(TransportRegistry::with_defaults()));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;

        if self.dry_run {
            let plan = runtime
                .block_on(session.plan(site, environment, settings))
                .with_context(|| format!("{environment} deployment plan for '{}' failed", self.site))?;
            print_plan(&plan);
        } else {
            let report = runtime
                .block_on(session.deploy(site, environment, settings))
                .with_context(|| format!("{environment} deployment of '{}' failed", self.site))?;
            println!("{} {report}", "✓".green().bold());
        }
        Ok(())
    }
}

fn print_plan(plan: &DeployPlan) {
    println!("[dry-run] {}", plan.report);
    if plan.report.skipped {
        return;
    }
    if plan.operations.is_empty() {
        println!("  nothing to do");
        return;
    }
    for operation in &plan.operations {
        let marker = match operation.kind() {
            OperationKind::Upload => "+".green(),
            OperationKind::Update => "~".yellow(),
            OperationKind::Remove => "-".red(),
        };
        println!("  {marker}  {}", operation.path());
    }
}
