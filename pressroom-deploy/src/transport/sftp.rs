//! SFTP over an SSH session (`russh` + `russh-sftp`).
//!
//! One SSH connection and one SFTP channel per session; the listing walk,
//! every write and the post-apply cleanup all reuse them.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use chrono::DateTime;

use pressroom_core::{SftpAuthMethod, SftpSettings};

use crate::diff::OperationKind;
use crate::error::{connection_err, traversal_err, write_err, DeployError};
use crate::snapshot::{FileRecord, FileTreeSnapshot};
use crate::transport::{RemoteTransport, SyncStrategy};

const SFTP_SUBSYSTEM: &str = "sftp";

// ---------------------------------------------------------------------------
// Host key verification
// ---------------------------------------------------------------------------

struct HostKeyCheck {
    host: String,
    port: u16,
    known_hosts: Option<PathBuf>,
    insecure: bool,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        if self.insecure {
            return Ok(true);
        }
        let Some(path) = &self.known_hosts else {
            warn!(host = %self.host, "no known_hosts file available; rejecting host key");
            return Ok(false);
        };
        match russh_keys::check_known_hosts_path(&self.host, self.port, server_public_key, path) {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(host = %self.host, known_hosts = %path.display(), "host key not found in known_hosts");
                Ok(false)
            }
            Err(err) => {
                warn!(host = %self.host, error = %err, "host key verification failed");
                Ok(false)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

struct Session {
    handle: Handle<HostKeyCheck>,
    sftp: SftpSession,
    /// Remote directories known to exist, so `put` skips redundant checks.
    directories: HashSet<String>,
}

pub struct SftpTransport {
    settings: SftpSettings,
    session: Option<Session>,
}

impl std::fmt::Debug for SftpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpTransport")
            .field("settings", &self.settings)
            .field("connected", &self.session.is_some())
            .finish()
    }
}

impl SftpTransport {
    pub fn new(settings: SftpSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    /// Absolute-or-base-relative remote path for a snapshot key.
    pub fn remote_path(&self, path: &str) -> String {
        join_remote(self.settings.base_path(), path)
    }

    fn session(&mut self) -> Result<&mut Session, DeployError> {
        let target = self.describe();
        self.session
            .as_mut()
            .ok_or_else(|| connection_err(target, "not connected"))
    }

    fn known_hosts(&self) -> Option<PathBuf> {
        self.settings
            .known_hosts
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts")))
    }

    async fn ensure_parent_dirs(&mut self, path: &str) -> Result<(), DeployError> {
        let Some((parent, _)) = path.rsplit_once('/') else {
            return Ok(());
        };
        let base = self.settings.base_path().to_string();
        let session = self.session()?;
        let mut current = String::new();
        for part in parent.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            if session.directories.contains(&current) {
                continue;
            }
            let remote = join_remote(&base, &current);
            let exists = session
                .sftp
                .try_exists(remote.as_str())
                .await
                .map_err(|e| write_err(path, OperationKind::Upload, e))?;
            if !exists {
                session
                    .sftp
                    .create_dir(remote.as_str())
                    .await
                    .map_err(|e| write_err(path, OperationKind::Upload, e))?;
                debug!(dir = %remote, "created remote directory");
            }
            session.directories.insert(current.clone());
        }
        Ok(())
    }

    /// Delete empty directories under the base path on the remote host.
    async fn remove_empty_dirs(&mut self) -> Result<(), DeployError> {
        let command = format!(
            "cd {} && find . -type d -empty -delete",
            shell_quote(self.settings.base_path())
        );
        let target = self.describe();
        let session = self.session()?;
        let mut channel = session
            .handle
            .channel_open_session()
            .await
            .map_err(|e| connection_err(&target, e))?;
        channel
            .exec(true, command.as_str())
            .await
            .map_err(|e| connection_err(&target, e))?;

        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            if let ChannelMsg::ExitStatus { exit_status: code } = msg {
                exit_status = Some(code);
            }
        }
        match exit_status {
            Some(0) => Ok(()),
            Some(code) => Err(connection_err(
                target,
                format!("empty directory cleanup exited with status {code}"),
            )),
            None => Err(connection_err(target, "empty directory cleanup reported no exit status")),
        }
    }
}

#[async_trait]
impl RemoteTransport for SftpTransport {
    fn strategy(&self) -> SyncStrategy {
        SyncStrategy::Diff
    }

    fn describe(&self) -> String {
        format!(
            "sftp://{}:{}/{}",
            self.settings.host,
            self.settings.port,
            self.settings.base_path().trim_start_matches('/')
        )
    }

    #[instrument(skip(self), fields(backend = "sftp", host = %self.settings.host))]
    async fn connect(&mut self) -> Result<(), DeployError> {
        if self.settings.insecure_skip_host_key_check {
            warn!(
                host = %self.settings.host,
                "host key verification disabled (insecure_skip_host_key_check)"
            );
        }
        let handler = HostKeyCheck {
            host: self.settings.host.clone(),
            port: self.settings.port,
            known_hosts: self.known_hosts(),
            insecure: self.settings.insecure_skip_host_key_check,
        };
        let target = self.describe();
        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(
            config,
            (self.settings.host.as_str(), self.settings.port),
            handler,
        )
        .await
        .map_err(|e| connection_err(&target, e))?;

        authenticate(&mut handle, &self.settings, &target).await?;

        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| connection_err(&target, e))?;
        channel
            .request_subsystem(true, SFTP_SUBSYSTEM)
            .await
            .map_err(|e| connection_err(&target, e))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| connection_err(&target, e))?;

        self.session = Some(Session {
            handle,
            sftp,
            directories: HashSet::new(),
        });
        info!(target = %target, "connected");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "sftp"))]
    async fn list(&mut self) -> Result<FileTreeSnapshot, DeployError> {
        let base = self.settings.base_path().to_string();
        let session = self.session()?;
        let mut snapshot = FileTreeSnapshot::new();

        let exists = session
            .sftp
            .try_exists(base.as_str())
            .await
            .map_err(|e| traversal_err(&base, e))?;
        if !exists {
            debug!(base = %base, "remote base path missing; treating as empty");
            return Ok(snapshot);
        }

        let mut pending = vec![String::new()];
        while let Some(relative_dir) = pending.pop() {
            let remote_dir = join_remote(&base, &relative_dir);
            let entries = session
                .sftp
                .read_dir(remote_dir.as_str())
                .await
                .map_err(|e| traversal_err(&remote_dir, e))?;
            for entry in entries {
                let name = entry.file_name();
                if name == "." || name == ".." {
                    continue;
                }
                let relative = if relative_dir.is_empty() {
                    name
                } else {
                    format!("{relative_dir}/{name}")
                };
                let metadata = entry.metadata();
                if metadata.is_dir() {
                    session.directories.insert(relative.clone());
                    pending.push(relative);
                    continue;
                }
                let modified_at = metadata
                    .mtime
                    .and_then(|secs| DateTime::from_timestamp(i64::from(secs), 0))
                    .unwrap_or_default();
                snapshot.insert(FileRecord::file(
                    relative,
                    metadata.size.unwrap_or_default(),
                    modified_at,
                ));
            }
        }

        debug!(files = snapshot.len(), "listed remote tree");
        Ok(snapshot)
    }

    #[instrument(skip(self, contents), fields(backend = "sftp", bytes = contents.len()))]
    async fn put(&mut self, path: &str, contents: Vec<u8>) -> Result<(), DeployError> {
        self.ensure_parent_dirs(path).await?;
        let remote = self.remote_path(path);
        let session = self.session()?;
        let mut file = session
            .sftp
            .create(remote.as_str())
            .await
            .map_err(|e| write_err(path, OperationKind::Upload, e))?;
        file.write_all(&contents)
            .await
            .map_err(|e| write_err(path, OperationKind::Upload, e))?;
        file.shutdown()
            .await
            .map_err(|e| write_err(path, OperationKind::Upload, e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "sftp"))]
    async fn remove(&mut self, path: &str) -> Result<(), DeployError> {
        let remote = self.remote_path(path);
        let session = self.session()?;
        session
            .sftp
            .remove_file(remote.as_str())
            .await
            .map_err(|e| write_err(path, OperationKind::Remove, e))?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), DeployError> {
        if !self.settings.remove_empty_dirs {
            return Ok(());
        }
        if let Err(err) = self.remove_empty_dirs().await {
            warn!(error = %err, "failed to remove empty remote directories");
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DeployError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        if let Err(err) = session.sftp.close().await {
            debug!(error = %err, "sftp close failed");
        }
        session
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| connection_err(self.describe(), e))?;
        Ok(())
    }
}

async fn authenticate(
    handle: &mut Handle<HostKeyCheck>,
    settings: &SftpSettings,
    target: &str,
) -> Result<(), DeployError> {
    let user = settings.user.as_str();
    let accepted = match settings.auth_method() {
        SftpAuthMethod::Password => {
            let password = settings.password.clone().unwrap_or_default();
            handle
                .authenticate_password(user, password)
                .await
                .map_err(|e| connection_err(target, e))?
        }
        SftpAuthMethod::Key => {
            let path = settings.key.as_ref().ok_or_else(|| {
                DeployError::Config("sftp method 'key' requires a key path".to_string())
            })?;
            let key = russh_keys::load_secret_key(path, settings.key_passphrase.as_deref())
                .map_err(|e| connection_err(target, e))?;
            handle
                .authenticate_publickey(user, Arc::new(key))
                .await
                .map_err(|e| connection_err(target, e))?
        }
        SftpAuthMethod::None => handle
            .authenticate_none(user)
            .await
            .map_err(|e| connection_err(target, e))?,
    };
    if accepted {
        Ok(())
    } else {
        Err(connection_err(target, format!("authentication rejected for user '{user}'")))
    }
}

fn join_remote(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    match (base.is_empty(), path.is_empty()) {
        (_, true) if base.is_empty() => "/".to_string(),
        (_, true) => base.to_string(),
        (true, false) => format!("/{path}"),
        (false, false) => format!("{base}/{path}"),
    }
}

/// Single-quote `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
