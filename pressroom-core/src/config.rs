//! YAML site configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.pressroom/
//!   config.yaml   (sites: mode 0600, created by `init`)
//! ```
//!
//! # API pattern
//!
//! Every function that touches the home directory has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{Environment, Site, SiteName};

/// Directory under the home directory holding all pressroom state.
pub const PRESSROOM_DIR: &str = ".pressroom";

/// Config file name inside [`PRESSROOM_DIR`].
pub const CONFIG_FILE: &str = "config.yaml";

/// Deployment target names with a settings section in [`crate::types::DeploymentSettings`].
pub const TARGET_SFTP: &str = "sftp";
pub const TARGET_AWS: &str = "aws";

const STARTER_CONFIG: &str = "\
# pressroom site configuration
sites: []
#  - name: blog
#    root_dir: /srv/blog
#    generator:
#      kind: hugo
#    build_drafts: false
#    deployment:
#      enabled: true
#      target: sftp
#      sftp:
#        host: example.org
#        user: deploy
#        method: key
#        key: /home/deploy/.ssh/id_ed25519
#        path: /var/www/blog
";

/// Top-level config document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sites: Vec<Site>,
}

impl Config {
    pub fn site(&self, name: &SiteName) -> Option<&Site> {
        self.sites.iter().find(|s| &s.name == name)
    }

    /// Checks that site names are unique, roots are set, and every enabled
    /// deployment carries the section its target needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for site in &self.sites {
            if !seen.insert(&site.name) {
                return Err(ConfigError::DuplicateSite {
                    name: site.name.clone(),
                });
            }
            if site.root_dir.as_os_str().is_empty() {
                return Err(ConfigError::EmptyRoot {
                    name: site.name.clone(),
                });
            }
            for &environment in Environment::all() {
                validate_deployment(site, environment)?;
            }
        }
        Ok(())
    }
}

fn validate_deployment(site: &Site, environment: Environment) -> Result<(), ConfigError> {
    let settings = site.deployment(environment);
    if !settings.enabled {
        return Ok(());
    }
    let missing = match settings.target.as_str() {
        "" => {
            return Err(ConfigError::MissingTarget {
                site: site.name.clone(),
                environment,
            })
        }
        TARGET_SFTP => settings.sftp.is_none(),
        TARGET_AWS => settings.aws.is_none(),
        // Other targets are resolved against the transport registry at deploy time.
        _ => false,
    };
    if missing {
        return Err(ConfigError::MissingTargetSettings {
            site: site.name.clone(),
            environment,
            target: settings.target.clone(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.pressroom/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(PRESSROOM_DIR).join(CONFIG_FILE)
}

/// `config_path_at` convenience wrapper.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_path_at(&home()?))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load and validate the config file at `path`.
///
/// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse` (with
/// path + line context) if malformed YAML.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    let config: Config = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// Load `<home>/.pressroom/config.yaml`.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    load_from(&config_path_at(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Init
// ---------------------------------------------------------------------------

/// Write a commented starter config if none exists yet.
///
/// Write flow: `.yaml.tmp` sibling → `chmod 0600` → `rename`. Idempotent:
/// an existing file is left untouched. Returns the config path.
pub fn init_at(home: &Path) -> Result<PathBuf, ConfigError> {
    let path = config_path_at(home);
    if path.exists() {
        return Ok(path);
    }
    let dir = home.join(PRESSROOM_DIR);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| ConfigError::io(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    let tmp = dir.join(format!("{CONFIG_FILE}.tmp"));
    std::fs::write(&tmp, STARTER_CONFIG).map_err(|e| ConfigError::io(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| ConfigError::io(&path, e))?;
    Ok(path)
}

/// `init_at` convenience wrapper.
pub fn init() -> Result<PathBuf, ConfigError> {
    init_at(&home()?)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| ConfigError::io(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| ConfigError::io(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        let path = config_path_at(home.path());
        assert!(path.ends_with(".pressroom/config.yaml"));
    }

    #[test]
    fn init_writes_loadable_starter_config() {
        let home = TempDir::new().expect("tempdir");
        let path = init_at(home.path()).expect("init");
        assert!(path.exists());
        assert!(!path.with_file_name("config.yaml.tmp").exists());

        let config = load_at(home.path()).expect("load starter");
        assert!(config.sites.is_empty());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn init_is_idempotent() {
        let home = TempDir::new().expect("tempdir");
        let path = init_at(home.path()).expect("init");
        std::fs::write(&path, "sites: []\n# edited\n").expect("edit");
        init_at(home.path()).expect("init again");
        let contents = std::fs::read_to_string(&path).expect("read");
        assert!(contents.contains("# edited"));
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(ConfigError::HomeNotFound.to_string().contains("home directory"));
    }
}
