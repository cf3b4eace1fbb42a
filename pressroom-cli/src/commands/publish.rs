//! `pressroom publish <site> [--no-cache]`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use pressroom_daemon::request_publish;

use super::home_dir;

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Site to rebuild and redeploy.
    pub site: String,

    /// Rebuild from scratch, ignoring the generator's cache.
    #[arg(long)]
    pub no_cache: bool,
}

impl PublishArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let summary = request_publish(&home, &self.site, !self.no_cache)
            .with_context(|| format!("publish of '{}' failed", self.site))?;
        print_summary(&self.site, &summary);
        Ok(())
    }
}

fn print_summary(site: &str, summary: &Value) {
    let duration = summary["duration_ms"].as_u64().unwrap_or(0);
    println!(
        "{} '{site}' published in {:.1}s",
        "✓".green().bold(),
        duration as f64 / 1000.0
    );
    for deployment in summary["deployments"].as_array().into_iter().flatten() {
        let environment = deployment["environment"].as_str().unwrap_or("?");
        if deployment["skipped"].as_bool().unwrap_or(false) {
            println!("  {environment}: deployment disabled");
            continue;
        }
        println!(
            "  {environment} -> {}: {} uploaded, {} updated, {} removed",
            deployment["target"].as_str().unwrap_or("?"),
            deployment["uploaded"],
            deployment["updated"],
            deployment["removed"],
        );
    }
}
