//! End-to-end daemon behaviour over the Unix socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pressroom_core::{Config, DeploymentSettings, Generator, OutputSettings, Site, SiteName};
use pressroom_daemon::paths::socket_path;
use pressroom_daemon::{
    request_cancel, request_publish, request_status, request_stop, serve, BuildRegistry,
    DaemonError, Publisher,
};
use pressroom_deploy::transport::MemoryTransport;
use pressroom_deploy::{DeploymentSession, RemoteTransport, SyncStrategy, TransportRegistry};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

fn blog(root: &Path) -> Site {
    Site {
        name: SiteName::from("blog"),
        root_dir: root.to_path_buf(),
        generator: Generator::Command {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "mkdir -p public/css && echo hi > public/index.html && echo body > public/css/site.css"
                    .to_string(),
            ],
        },
        output: OutputSettings::default(),
        build_drafts: false,
        drafts_url: None,
        deployment: DeploymentSettings {
            enabled: true,
            target: "memory".to_string(),
            ..DeploymentSettings::default()
        },
        drafts_deployment: DeploymentSettings::default(),
    }
}

fn publisher(site: Site, remote: &MemoryTransport) -> Publisher {
    let mut transports = TransportRegistry::new();
    let shared = remote.clone();
    transports.register("memory", move |_| {
        Ok(Box::new(shared.clone()) as Box<dyn RemoteTransport>)
    });
    Publisher::new(
        &Config { sites: vec![site] },
        Arc::new(BuildRegistry::new()),
        DeploymentSession::new(Arc::new(transports)),
    )
}

async fn wait_for_socket(home: &Path) {
    let socket = socket_path(home);
    for _ in 0..200 {
        if socket.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("daemon socket never appeared at {}", socket.display());
}

async fn blocking<T, F>(home: PathBuf, call: F) -> T
where
    T: Send + 'static,
    F: FnOnce(&Path) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(&home))
        .await
        .expect("client task")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_status_cancel_and_stop_over_socket() {
    let home = TempDir::new().expect("home");
    let root = TempDir::new().expect("site root");
    let remote = MemoryTransport::new(SyncStrategy::Diff);

    let daemon = tokio::spawn(serve(home.path().to_path_buf(), publisher(blog(root.path()), &remote)));
    wait_for_socket(home.path()).await;

    let status = assert_ok!(blocking(home.path().to_path_buf(), request_status).await);
    assert_eq!(status["running"], serde_json::json!(true));
    assert_eq!(status["sites"][0]["name"], serde_json::json!("blog"));
    assert_eq!(status["sites"][0]["last_publish_at_unix"], serde_json::json!(0));

    let summary = assert_ok!(
        blocking(home.path().to_path_buf(), |home| request_publish(home, "blog", true)).await
    );
    assert_eq!(summary["site"], serde_json::json!("blog"));
    assert_eq!(summary["deployments"][0]["uploaded"], serde_json::json!(2));
    assert_eq!(
        remote.paths(),
        vec!["css/site.css".to_string(), "index.html".to_string()]
    );

    let status = assert_ok!(blocking(home.path().to_path_buf(), request_status).await);
    assert!(status["last_publish_at_unix"].as_u64().expect("timestamp") > 0);

    let unknown = blocking(home.path().to_path_buf(), |home| request_publish(home, "docs", true)).await;
    assert!(matches!(unknown, Err(DaemonError::Protocol(ref m)) if m.contains("unknown site")));

    assert_err!(blocking(home.path().to_path_buf(), |home| request_cancel(home, "blog")).await);

    assert_ok!(blocking(home.path().to_path_buf(), request_stop).await);
    let result = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon stops")
        .expect("join");
    assert_ok!(result);
    assert!(!socket_path(home.path()).exists(), "socket removed on shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_daemon_refuses_live_socket() {
    let home = TempDir::new().expect("home");
    let root = TempDir::new().expect("site root");
    let remote = MemoryTransport::new(SyncStrategy::Diff);

    let first = tokio::spawn(serve(home.path().to_path_buf(), publisher(blog(root.path()), &remote)));
    wait_for_socket(home.path()).await;

    let second = serve(home.path().to_path_buf(), publisher(blog(root.path()), &remote)).await;
    assert!(matches!(second, Err(DaemonError::Protocol(_))));

    assert_ok!(blocking(home.path().to_path_buf(), request_stop).await);
    assert_ok!(first.await.expect("join"));
}
