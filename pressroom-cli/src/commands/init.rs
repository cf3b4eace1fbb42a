//! `pressroom init`

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use pressroom_core::config;

/// Write a starter config to ~/.pressroom/config.yaml (kept if present).
#[derive(Args, Debug)]
pub struct InitArgs {}

impl InitArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        if let Some(path) = config_path {
            bail!(
                "`init` always writes the default location; drop --config {}",
                path.display()
            );
        }
        let path = config::init().context("failed to write starter config")?;
        println!("✓ Config ready at {}", path.display());
        println!("  Add your sites, then run `pressroom daemon start`.");
        Ok(())
    }
}
