//! `pressroom cancel <site>`

use anyhow::{Context, Result};
use clap::Args;

use pressroom_daemon::request_cancel;

use super::home_dir;

#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Site whose running build should stop.
    pub site: String,
}

impl CancelArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let cancelled = request_cancel(&home, &self.site)
            .with_context(|| format!("failed to cancel build of '{}'", self.site))?;
        println!(
            "✓ Cancelled build {} of '{}'",
            cancelled["build_id"], self.site
        );
        Ok(())
    }
}
