//! `pressroom status`: configured sites joined with live daemon state.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use pressroom_core::{Config, DeploymentSettings, Site};
use pressroom_daemon::protocol::CMD_STATUS;
use pressroom_daemon::{send_request, DaemonError, DaemonRequest};

use super::{format_age, home_dir, load_config};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let config = load_config(config_path)?;
        let home = home_dir()?;
        let daemon = query_daemon(&home)?;
        let report = build_report(&config, daemon.as_ref());

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render status JSON")?
            );
        } else {
            print_table(&report);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    daemon_running: bool,
    sites: Vec<SiteStatus>,
}

#[derive(Debug, Serialize)]
struct SiteStatus {
    name: String,
    generator: String,
    production: String,
    draft: Option<String>,
    building: bool,
    last_publish_at: Option<DateTime<Utc>>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "site")]
    site: String,
    #[tabled(rename = "generator")]
    generator: String,
    #[tabled(rename = "production")]
    production: String,
    #[tabled(rename = "draft")]
    draft: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "last publish")]
    last_publish: String,
}

/// Daemon status payload, or `None` when no daemon is listening.
fn query_daemon(home: &Path) -> Result<Option<Value>> {
    match send_request(home, &DaemonRequest::new(CMD_STATUS)) {
        Ok(response) if response.ok => Ok(response.data),
        Ok(response) => Err(anyhow!(
            "daemon rejected status request: {}",
            response.error.as_deref().unwrap_or("unknown daemon error")
        )),
        Err(DaemonError::DaemonNotRunning { .. }) => Ok(None),
        Err(err) => Err(err).context("failed to query daemon status"),
    }
}

fn build_report(config: &Config, daemon: Option<&Value>) -> StatusReport {
    let live: HashMap<&str, &Value> = daemon
        .and_then(|status| status["sites"].as_array())
        .into_iter()
        .flatten()
        .filter_map(|site| site["name"].as_str().map(|name| (name, site)))
        .collect();

    let sites = config
        .sites
        .iter()
        .map(|site| {
            let entry = live.get(site.name.0.as_str());
            let last_publish_at = entry
                .and_then(|e| e["last_publish_at_unix"].as_i64())
                .filter(|secs| *secs > 0)
                .and_then(|secs| DateTime::from_timestamp(secs, 0));
            SiteStatus {
                name: site.name.0.clone(),
                generator: site.generator.to_string(),
                production: describe_target(&site.deployment),
                draft: draft_target(site),
                building: entry
                    .and_then(|e| e["building"].as_bool())
                    .unwrap_or(false),
                last_publish_at,
            }
        })
        .collect();

    StatusReport {
        daemon_running: daemon.is_some(),
        sites,
    }
}

fn describe_target(settings: &DeploymentSettings) -> String {
    if settings.enabled {
        settings.target.clone()
    } else {
        "disabled".to_string()
    }
}

fn draft_target(site: &Site) -> Option<String> {
    site.build_drafts
        .then(|| describe_target(&site.drafts_deployment))
}

fn print_table(report: &StatusReport) {
    let daemon = if report.daemon_running {
        "running".green().bold()
    } else {
        "not running".red().bold()
    };
    println!("daemon: {daemon}");

    if report.sites.is_empty() {
        println!("No sites configured. Edit ~/.pressroom/config.yaml to add one.");
        return;
    }

    let rows: Vec<StatusTableRow> = report
        .sites
        .iter()
        .map(|site| StatusTableRow {
            site: site.name.clone(),
            generator: site.generator.clone(),
            production: site.production.clone(),
            draft: site.draft.clone().unwrap_or_else(|| "-".to_string()),
            state: if site.building {
                "building".yellow().to_string()
            } else {
                "idle".to_string()
            },
            last_publish: site
                .last_publish_at
                .map(|at| {
                    let age = Utc::now().signed_duration_since(at).num_seconds().max(0) as u64;
                    format_age(age)
                })
                .unwrap_or_else(|| "never".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config() -> Config {
        load_yaml(
            "sites:\n\
             \x20 - name: blog\n\
             \x20   root_dir: /srv/blog\n\
             \x20   build_drafts: true\n\
             \x20 - name: docs\n\
             \x20   root_dir: /srv/docs\n\
             \x20   generator: { kind: astro }\n",
        )
    }

    fn load_yaml(yaml: &str) -> Config {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, yaml).expect("write");
        pressroom_core::config::load_from(&path).expect("load")
    }

    #[test]
    fn report_without_daemon() {
        let report = build_report(&config(), None);
        assert!(!report.daemon_running);
        assert_eq!(report.sites.len(), 2);
        assert_eq!(report.sites[0].production, "disabled");
        assert_eq!(report.sites[0].draft.as_deref(), Some("disabled"));
        assert_eq!(report.sites[1].generator, "astro");
        assert!(report.sites[1].draft.is_none());
        assert!(report.sites.iter().all(|s| !s.building && s.last_publish_at.is_none()));
    }

    #[test]
    fn report_merges_live_state() {
        let daemon = json!({
            "running": true,
            "sites": [
                {"name": "blog", "building": true, "last_publish_at_unix": 1_700_000_000},
                {"name": "docs", "building": false, "last_publish_at_unix": 0}
            ]
        });
        let report = build_report(&config(), Some(&daemon));
        assert!(report.daemon_running);
        assert!(report.sites[0].building);
        assert_eq!(
            report.sites[0].last_publish_at.map(|at| at.timestamp()),
            Some(1_700_000_000)
        );
        assert!(report.sites[1].last_publish_at.is_none());
    }
}
