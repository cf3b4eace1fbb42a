use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};

use pressroom_core::{config, SiteName};
use pressroom_deploy::{DeploymentSession, TransportRegistry};

use crate::builds::BuildRegistry;
use crate::error::{io_err, DaemonError, PublishError};
use crate::paths::{config_path, run_dir, socket_path};
use crate::protocol::{
    DaemonRequest, DaemonResponse, CMD_CANCEL, CMD_PUBLISH, CMD_STATUS, CMD_STOP,
};
use crate::publish::Publisher;

/// Per-site last successful publish (Unix seconds), keyed by site name.
pub type PublishTimestamps = HashMap<String, u64>;

#[derive(Clone)]
struct ClientContext {
    home: PathBuf,
    publisher: Arc<Publisher>,
    timestamps: Arc<RwLock<PublishTimestamps>>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load the site config under `home` and serve until stopped.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    tracing::info!(
        sites = config.sites.len(),
        config = %config_path(&home).display(),
        "loaded site config"
    );

    let run = run_dir(&home);
    let publisher = Publisher::new(
        &config,
        Arc::new(BuildRegistry::new()),
        DeploymentSession::new(Arc::new(TransportRegistry::with_defaults())),
    )
    .with_log_dir(run);
    serve(home, publisher).await
}

/// Run the socket server and signal handler around `publisher`.
pub async fn serve(home: PathBuf, publisher: Publisher) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let context = ClientContext {
        home,
        publisher: Arc::new(publisher),
        timestamps: Arc::new(RwLock::new(PublishTimestamps::new())),
        shutdown_tx: shutdown_tx.clone(),
        started_at_unix: crate::unix_seconds_now(),
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(context, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn socket_server_task(
    context: ClientContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&context.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let context = context.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, context).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, context: ClientContext) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = dispatch(&request, &context).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == CMD_STOP {
            break;
        }
    }

    Ok(())
}

async fn dispatch(request: &DaemonRequest, context: &ClientContext) -> DaemonResponse {
    match request.cmd.as_str() {
        CMD_STATUS => DaemonResponse::ok(build_status_payload(context).await),
        CMD_PUBLISH => {
            let Some(site) = request.site.as_deref() else {
                return DaemonResponse::error("publish requires a site");
            };
            let site = SiteName::from(site);
            match context
                .publisher
                .publish(&site, request.cache.unwrap_or(true))
                .await
            {
                Ok(summary) => {
                    context
                        .timestamps
                        .write()
                        .await
                        .insert(site.0.clone(), crate::unix_seconds_now());
                    tracing::info!(
                        site = %site,
                        build = summary.build_id,
                        duration_ms = summary.duration_ms,
                        "publish completed"
                    );
                    DaemonResponse::ok(json!(summary))
                }
                Err(err @ PublishError::Superseded(_)) => {
                    tracing::info!(site = %site, "publish superseded");
                    DaemonResponse::error(err.to_string())
                }
                Err(err) => {
                    tracing::error!(site = %site, error = %err, "publish failed");
                    DaemonResponse::error(err.to_string())
                }
            }
        }
        CMD_CANCEL => {
            let Some(site) = request.site.as_deref() else {
                return DaemonResponse::error("cancel requires a site");
            };
            match context.publisher.cancel(&SiteName::from(site)) {
                Ok(handle) => DaemonResponse::ok(json!({
                    "site": site,
                    "build_id": handle.id(),
                    "cancelled": true,
                })),
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        CMD_STOP => {
            let _ = context.shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

async fn build_status_payload(context: &ClientContext) -> Value {
    let timestamps: PublishTimestamps = context.timestamps.read().await.clone();
    let builds = context.publisher.builds();

    let sites: Vec<Value> = context
        .publisher
        .site_names()
        .iter()
        .map(|name| {
            json!({
                "name": name.0,
                "building": builds.has(name),
                "last_publish_at_unix": timestamps.get(&name.0).copied().unwrap_or(0),
            })
        })
        .collect();

    json!({
        "running": true,
        "started_at_unix": context.started_at_unix,
        "last_publish_at_unix": timestamps.values().copied().max().unwrap_or(0),
        "sites": sites,
        "active_builds": builds.active(),
        "socket": socket_path(&context.home).display().to_string(),
        "config": config_path(&context.home).display().to_string(),
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let run = run_dir(home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
