use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn pressroom(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pressroom").expect("pressroom binary");
    cmd.env("HOME", home).env("NO_COLOR", "1");
    cmd
}

fn write_config(home: &Path, yaml: &str) {
    let dir = home.join(".pressroom");
    fs::create_dir_all(&dir).expect("config dir");
    fs::write(dir.join("config.yaml"), yaml).expect("write config");
}

#[test]
fn help_lists_commands() {
    let home = TempDir::new().expect("home");
    pressroom(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("publish")
                .and(predicate::str::contains("deploy"))
                .and(predicate::str::contains("daemon")),
        );
}

#[test]
fn init_writes_starter_config_once() {
    let home = TempDir::new().expect("home");
    pressroom(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("config.yaml"));

    let path = home.path().join(".pressroom/config.yaml");
    assert!(path.exists());
    fs::write(&path, "sites: []\n").expect("edit config");

    pressroom(home.path()).arg("init").assert().success();
    assert_eq!(fs::read_to_string(&path).expect("read"), "sites: []\n");
}

#[test]
fn status_without_daemon_lists_sites() {
    let home = TempDir::new().expect("home");
    write_config(
        home.path(),
        "sites:\n  - name: blog\n    root_dir: /srv/blog\n",
    );

    pressroom(home.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"daemon_running\": false")
                .and(predicate::str::contains("\"name\": \"blog\"")),
        );
}

#[test]
fn dry_run_of_disabled_deployment_touches_nothing() {
    let home = TempDir::new().expect("home");
    let site = TempDir::new().expect("site");
    fs::create_dir_all(site.path().join("public")).expect("public");
    fs::write(site.path().join("public/index.html"), "hi").expect("index");
    write_config(
        home.path(),
        &format!(
            "sites:\n  - name: blog\n    root_dir: {}\n",
            site.path().display()
        ),
    );

    pressroom(home.path())
        .args(["deploy", "blog", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[dry-run] blog (production): deployment disabled"));
}

#[test]
fn deploy_with_explicit_config_and_unknown_site_fails() {
    let home = TempDir::new().expect("home");
    let dir = TempDir::new().expect("config dir");
    let config = dir.path().join("sites.yaml");
    fs::write(&config, "sites: []\n").expect("write");

    pressroom(home.path())
        .arg("--config")
        .arg(&config)
        .args(["deploy", "docs", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown site 'docs'"));
}

#[test]
fn unknown_target_is_reported() {
    let home = TempDir::new().expect("home");
    let site = TempDir::new().expect("site");
    fs::create_dir_all(site.path().join("public")).expect("public");
    write_config(
        home.path(),
        &format!(
            "sites:\n  - name: blog\n    root_dir: {}\n    deployment:\n      enabled: true\n      target: ftp\n",
            site.path().display()
        ),
    );

    pressroom(home.path())
        .args(["deploy", "blog", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ftp"));
}

#[test]
fn insecure_host_key_warning_reaches_stderr() {
    let home = TempDir::new().expect("home");
    let site = TempDir::new().expect("site");
    fs::create_dir_all(site.path().join("public")).expect("public");
    fs::write(site.path().join("public/index.html"), "hi").expect("index");
    write_config(
        home.path(),
        &format!(
            "sites:\n  - name: blog\n    root_dir: {}\n    deployment:\n      enabled: true\n      target: sftp\n      sftp:\n        host: 127.0.0.1\n        port: 1\n        user: deploy\n        password: secret\n        insecure_skip_host_key_check: true\n",
            site.path().display()
        ),
    );

    pressroom(home.path())
        .env_remove("RUST_LOG")
        .args(["deploy", "blog", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("host key verification disabled"));
}

#[test]
fn publish_without_daemon_fails_cleanly() {
    let home = TempDir::new().expect("home");
    pressroom(home.path())
        .args(["publish", "blog"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("daemon is not running"));
}

#[test]
fn daemon_stop_without_daemon_is_not_an_error() {
    let home = TempDir::new().expect("home");
    pressroom(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("daemon is not running"));
}
