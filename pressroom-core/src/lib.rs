//! Pressroom core library: site configuration, domain types, errors.
//!
//! - [`types`]: newtypes, sites and deployment settings
//! - [`config`]: YAML config load / validate / init
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
pub use types::{
    DeploymentSettings, Environment, Generator, ObjectStorageSettings, OutputSettings, SftpAuthMethod,
    SftpSettings, Site, SiteName,
};
