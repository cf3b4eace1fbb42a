pub mod cancel;
pub mod daemon;
pub mod deploy;
pub mod init;
pub mod publish;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use pressroom_core::{config, Config};

pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Load `path`, or the default config under the home directory.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_from(path)
            .with_context(|| format!("failed to load config '{}'", path.display())),
        None => config::load().context("failed to load config; run `pressroom init` first"),
    }
}

pub fn format_age(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s ago");
    }
    if seconds < 60 * 60 {
        return format!("{}m ago", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h ago", seconds / (60 * 60));
    }
    format!("{}d ago", seconds / (60 * 60 * 24))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ages_use_largest_whole_unit() {
        assert_eq!(format_age(5), "5s ago");
        assert_eq!(format_age(125), "2m ago");
        assert_eq!(format_age(3 * 3600 + 59), "3h ago");
        assert_eq!(format_age(2 * 86_400), "2d ago");
    }
}
