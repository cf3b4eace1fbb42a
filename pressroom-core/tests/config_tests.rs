//! Config load, parse-error, and validation integration tests.

use std::fs;
use std::path::PathBuf;

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use pressroom_core::{
    config,
    types::{Environment, Generator, SftpAuthMethod, SiteName},
    ConfigError,
};
use rstest::rstest;

const FULL_CONFIG: &str = r#"
sites:
  - name: blog
    root_dir: /srv/blog
    generator:
      kind: hugo
    output:
      build: dist
    build_drafts: true
    drafts_url: https://drafts.example.org
    deployment:
      enabled: true
      target: sftp
      sftp:
        host: example.org
        user: deploy
        password: hunter2
        path: /var/www/blog
    drafts_deployment:
      enabled: true
      target: aws
      aws:
        bucket: blog-drafts
        region: eu-west-1
        access_key: AKIAEXAMPLE
        secret_key: secret
        prefix: drafts/
        cloudfront_distribution: E123
  - name: docs
    root_dir: /srv/docs
    generator:
      kind: command
      program: npm
      args: [run, build]
"#;

fn write_config(home: &assert_fs::TempDir, contents: &str) {
    let file = home.child(".pressroom").child("config.yaml");
    file.write_str(contents).expect("write config");
}

// ---------------------------------------------------------------------------
// 1. Load
// ---------------------------------------------------------------------------

#[test]
fn load_full_config() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, FULL_CONFIG);

    let cfg = config::load_at(home.path()).expect("load");
    assert_eq!(cfg.sites.len(), 2);

    let blog = cfg.site(&SiteName::from("blog")).expect("blog");
    assert_eq!(blog.generator, Generator::Hugo);
    assert_eq!(blog.output_dir(Environment::Production), PathBuf::from("/srv/blog/dist"));
    assert_eq!(
        blog.output_dir(Environment::Draft),
        PathBuf::from("/srv/blog/publicDrafts")
    );
    assert_eq!(blog.environments(), vec![Environment::Production, Environment::Draft]);

    let sftp = blog.deployment.sftp.as_ref().expect("sftp section");
    assert_eq!(sftp.port, 22);
    assert_eq!(sftp.auth_method(), SftpAuthMethod::Password);
    assert_eq!(sftp.base_path(), "/var/www/blog");
    assert!(!sftp.insecure_skip_host_key_check);

    let aws = blog.drafts_deployment.aws.as_ref().expect("aws section");
    assert_eq!(aws.bucket, "blog-drafts");
    assert_eq!(aws.cloudfront_distribution.as_deref(), Some("E123"));

    let docs = cfg.site(&SiteName::from("docs")).expect("docs");
    assert!(!docs.deployment.enabled, "deployments default to disabled");
    assert_eq!(docs.environments(), vec![Environment::Production]);
}

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, ": : corrupt : yaml : !!!\n  - broken: [unclosed");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn init_creates_config_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::init_at(home.path()).expect("init");
    home.child(".pressroom")
        .child("config.yaml")
        .assert(predicate::str::contains("sites: []"));
}

// ---------------------------------------------------------------------------
// 2. Validation
// ---------------------------------------------------------------------------

#[test]
fn duplicate_site_names_are_rejected() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(
        &home,
        "sites:\n  - name: blog\n    root_dir: /a\n  - name: blog\n    root_dir: /b\n",
    );
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateSite { .. }), "got: {err}");
}

#[test]
fn empty_root_is_rejected() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, "sites:\n  - name: blog\n    root_dir: \"\"\n");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::EmptyRoot { .. }), "got: {err}");
}

#[rstest]
#[case::sftp_without_section("sftp")]
#[case::aws_without_section("aws")]
fn enabled_deployment_needs_target_section(#[case] expected: &str) {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(
        &home,
        &format!(
            "sites:\n  - name: blog\n    root_dir: /srv/blog\n    deployment:\n      enabled: true\n      target: {expected}\n"
        ),
    );
    let err = config::load_at(home.path()).unwrap_err();
    assert!(
        matches!(err, ConfigError::MissingTargetSettings { ref target, .. } if target == expected),
        "got: {err}"
    );
}

#[test]
fn enabled_deployment_needs_target() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(
        &home,
        "sites:\n  - name: blog\n    root_dir: /srv/blog\n    drafts_deployment:\n      enabled: true\n",
    );
    let err = config::load_at(home.path()).unwrap_err();
    match err {
        ConfigError::MissingTarget { environment, .. } => {
            assert_eq!(environment, Environment::Draft)
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn disabled_deployment_is_not_validated() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(
        &home,
        "sites:\n  - name: blog\n    root_dir: /srv/blog\n    deployment:\n      enabled: false\n      target: sftp\n",
    );
    config::load_at(home.path()).expect("disabled deployments need no section");
}

#[test]
fn config_file_is_plain_yaml_on_disk() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, FULL_CONFIG);
    let raw = fs::read_to_string(config::config_path_at(home.path())).expect("read");
    assert!(raw.contains("target: sftp"));
}
