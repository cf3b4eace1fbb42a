//! Domain types for sites and their deployment targets.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde + serde_yaml.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default SSH port used when an SFTP target does not configure one.
pub const DEFAULT_SFTP_PORT: u16 = 22;

/// Output directory used when a site does not configure `output.build`.
pub const DEFAULT_BUILD_DIR: &str = "public";

/// Output directory used when a site does not configure `output.draft`.
pub const DEFAULT_DRAFT_DIR: &str = "publicDrafts";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed site identifier. Builds and deployments are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteName(pub String);

impl fmt::Display for SiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SiteName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SiteName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which of a site's two deployments is being built or published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Draft,
}

impl Environment {
    pub fn all() -> &'static [Environment] {
        &[Environment::Production, Environment::Draft]
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Draft => write!(f, "draft"),
        }
    }
}

/// The static-site generator a site is built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Generator {
    #[default]
    Hugo,
    Astro,
    /// An arbitrary build command run in the site root.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl fmt::Display for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generator::Hugo => write!(f, "hugo"),
            Generator::Astro => write!(f, "astro"),
            Generator::Command { program, .. } => write!(f, "{program}"),
        }
    }
}

/// SSH authentication method for an SFTP target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SftpAuthMethod {
    Password,
    Key,
    None,
}

// ---------------------------------------------------------------------------
// Deployment settings
// ---------------------------------------------------------------------------

/// Connection settings for an SFTP deployment target.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SftpSettings {
    pub host: String,
    #[serde(default = "default_sftp_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    /// Explicit method; when absent it is inferred, see [`SftpSettings::auth_method`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<SftpAuthMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Path to a private key file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_passphrase: Option<String>,
    /// Remote base directory the site is published into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Known-hosts file; `~/.ssh/known_hosts` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<PathBuf>,
    /// Accept any host key. Never the default.
    #[serde(default)]
    pub insecure_skip_host_key_check: bool,
    /// Delete empty remote directories after removals.
    #[serde(default = "default_true")]
    pub remove_empty_dirs: bool,
}

impl SftpSettings {
    /// The effective auth method: the configured one, otherwise `password`
    /// when a password is set, otherwise `none`.
    pub fn auth_method(&self) -> SftpAuthMethod {
        match self.method {
            Some(method) => method,
            None if self.password.as_deref().is_some_and(|p| !p.is_empty()) => {
                SftpAuthMethod::Password
            }
            None => SftpAuthMethod::None,
        }
    }

    /// Remote base path, `./` when unset.
    pub fn base_path(&self) -> &str {
        match self.path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ => "./",
        }
    }
}

impl fmt::Debug for SftpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("method", &self.auth_method())
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key", &self.key)
            .field("path", &self.base_path())
            .field("known_hosts", &self.known_hosts)
            .field(
                "insecure_skip_host_key_check",
                &self.insecure_skip_host_key_check,
            )
            .finish_non_exhaustive()
    }
}

/// Settings for an S3-compatible bucket fronted by an optional CloudFront
/// distribution.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStorageSettings {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Key prefix objects are published under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// CloudFront distribution invalidated after upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudfront_distribution: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO etc.).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

impl fmt::Debug for ObjectStorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStorageSettings")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("prefix", &self.prefix)
            .field("cloudfront_distribution", &self.cloudfront_distribution)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// One deployment of a site (production or draft).
///
/// `target` is a discriminator resolved at deploy time (`"sftp"`, `"aws"`);
/// the matching section carries the target-specific settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeploymentSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sftp: Option<SftpSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<ObjectStorageSettings>,
}

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

/// Where the generator writes its output, relative to the site root unless absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OutputSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<PathBuf>,
}

/// A site managed by pressroom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub name: SiteName,
    /// Directory the generator runs in.
    pub root_dir: PathBuf,
    #[serde(default)]
    pub generator: Generator,
    #[serde(default)]
    pub output: OutputSettings,
    /// Also build and publish the draft environment.
    #[serde(default)]
    pub build_drafts: bool,
    /// Base URL the draft build is generated for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drafts_url: Option<String>,
    #[serde(default)]
    pub deployment: DeploymentSettings,
    #[serde(default)]
    pub drafts_deployment: DeploymentSettings,
}

impl Site {
    /// Output directory for `environment`.
    ///
    /// Absolute settings are used as-is, relative ones are joined to
    /// `root_dir`, and missing ones fall back to `public` / `publicDrafts`.
    pub fn output_dir(&self, environment: Environment) -> PathBuf {
        let (configured, default) = match environment {
            Environment::Production => (self.output.build.as_deref(), DEFAULT_BUILD_DIR),
            Environment::Draft => (self.output.draft.as_deref(), DEFAULT_DRAFT_DIR),
        };
        match configured {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) if !dir.as_os_str().is_empty() => self.root_dir.join(dir),
            _ => self.root_dir.join(default),
        }
    }

    pub fn deployment(&self, environment: Environment) -> &DeploymentSettings {
        match environment {
            Environment::Production => &self.deployment,
            Environment::Draft => &self.drafts_deployment,
        }
    }

    /// Environments this site builds, in publish order.
    pub fn environments(&self) -> Vec<Environment> {
        if self.build_drafts {
            vec![Environment::Production, Environment::Draft]
        } else {
            vec![Environment::Production]
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }
}

fn default_sftp_port() -> u16 {
    DEFAULT_SFTP_PORT
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn site(output: OutputSettings) -> Site {
        Site {
            name: SiteName::from("blog"),
            root_dir: PathBuf::from("/srv/blog"),
            generator: Generator::default(),
            output,
            build_drafts: false,
            drafts_url: None,
            deployment: DeploymentSettings::default(),
            drafts_deployment: DeploymentSettings::default(),
        }
    }

    #[test]
    fn newtype_display() {
        assert_eq!(SiteName::from("blog").to_string(), "blog");
        assert_eq!(Environment::Draft.to_string(), "draft");
    }

    #[test]
    fn output_dir_defaults_to_public_dirs() {
        let s = site(OutputSettings::default());
        assert_eq!(
            s.output_dir(Environment::Production),
            PathBuf::from("/srv/blog/public")
        );
        assert_eq!(
            s.output_dir(Environment::Draft),
            PathBuf::from("/srv/blog/publicDrafts")
        );
    }

    #[test]
    fn output_dir_joins_relative_and_keeps_absolute() {
        let s = site(OutputSettings {
            build: Some(PathBuf::from("dist")),
            draft: Some(PathBuf::from("/var/www/drafts")),
        });
        assert_eq!(
            s.output_dir(Environment::Production),
            PathBuf::from("/srv/blog/dist")
        );
        assert_eq!(
            s.output_dir(Environment::Draft),
            PathBuf::from("/var/www/drafts")
        );
    }

    #[test]
    fn auth_method_is_inferred_from_password() {
        let mut sftp: SftpSettings =
            serde_yaml::from_str("host: example.org\npassword: hunter2\n").expect("parse");
        assert_eq!(sftp.port, DEFAULT_SFTP_PORT);
        assert_eq!(sftp.auth_method(), SftpAuthMethod::Password);

        sftp.password = None;
        assert_eq!(sftp.auth_method(), SftpAuthMethod::None);

        sftp.method = Some(SftpAuthMethod::Key);
        assert_eq!(sftp.auth_method(), SftpAuthMethod::Key);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let sftp: SftpSettings =
            serde_yaml::from_str("host: example.org\npassword: hunter2\n").expect("parse");
        let rendered = format!("{sftp:?}");
        assert!(!rendered.contains("hunter2"), "got: {rendered}");

        let aws: ObjectStorageSettings = serde_yaml::from_str(
            "bucket: b\nregion: eu-west-1\naccess_key: AKIA\nsecret_key: s3cr3t\n",
        )
        .expect("parse");
        let rendered = format!("{aws:?}");
        assert!(!rendered.contains("s3cr3t"), "got: {rendered}");
    }

    #[test]
    fn generator_parses_tagged_variants() {
        let g: Generator = serde_yaml::from_str("kind: astro\n").expect("astro");
        assert_eq!(g, Generator::Astro);

        let g: Generator =
            serde_yaml::from_str("kind: command\nprogram: npm\nargs: [run, build]\n")
                .expect("command");
        assert_eq!(
            g,
            Generator::Command {
                program: "npm".to_string(),
                args: vec!["run".to_string(), "build".to_string()],
            }
        );
    }
}
