//! S3-compatible bucket with optional CloudFront invalidation.
//!
//! Object storage is always bulk-replaced: every existing key under the
//! prefix is deleted, every local file is uploaded, then the distribution
//! (if any) is invalidated for `/*`.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_cloudfront::types::{InvalidationBatch, Paths};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use pressroom_core::ObjectStorageSettings;

use crate::diff::OperationKind;
use crate::error::{connection_err, traversal_err, write_err, DeployError};
use crate::snapshot::{FileRecord, FileTreeSnapshot};
use crate::transport::{RemoteTransport, SyncStrategy};

/// `DeleteObjects` accepts at most this many keys per request.
const DELETE_BATCH_SIZE: usize = 1000;

const CACHE_CONTROL_HTML: &str = "no-cache, no-store";
/// 182 days.
const CACHE_CONTROL_ASSET: &str = "public, max-age=15724800";

const CREDENTIALS_PROVIDER_NAME: &str = "pressroom-config";

/// `Content-Type` for a published file, by extension.
pub fn content_type_for(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("xml") => "text/xml",
        Some("js") => "application/javascript",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("webm") => "video/webm",
        Some("mp4") => "video/mp4",
        Some("ogv") => "video/ogg",
        Some("avi") => "video/x-msvideo",
        Some("ogg") => "audio/ogg",
        Some("mp3" | "mpeg") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// `Cache-Control` for a published file: pages are never cached, assets for
/// half a year.
pub fn cache_control_for(path: &str) -> &'static str {
    let is_html = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("html"));
    if is_html {
        CACHE_CONTROL_HTML
    } else {
        CACHE_CONTROL_ASSET
    }
}

struct Clients {
    s3: aws_sdk_s3::Client,
    cloudfront: Option<aws_sdk_cloudfront::Client>,
}

pub struct ObjectStorageTransport {
    settings: ObjectStorageSettings,
    prefix: Option<String>,
    clients: Option<Clients>,
}

impl std::fmt::Debug for ObjectStorageTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorageTransport")
            .field("bucket", &self.settings.bucket)
            .field("prefix", &self.prefix)
            .field("connected", &self.clients.is_some())
            .finish_non_exhaustive()
    }
}

impl ObjectStorageTransport {
    pub fn new(settings: ObjectStorageSettings) -> Self {
        // Strip slashes to avoid double-slash keys like "prefix//key".
        let prefix = settings
            .prefix
            .as_deref()
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self {
            settings,
            prefix,
            clients: None,
        }
    }

    /// Object key for a relative path.
    pub fn full_key(&self, path: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{path}"),
            None => path.to_string(),
        }
    }

    /// Relative path for an object key.
    pub fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        match &self.prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(key),
            None => key,
        }
    }

    fn list_prefix(&self) -> Option<String> {
        self.prefix.as_ref().map(|p| format!("{p}/"))
    }

    fn clients(&self) -> Result<&Clients, DeployError> {
        self.clients
            .as_ref()
            .ok_or_else(|| connection_err(self.describe(), "not connected"))
    }

    fn build_clients(&self) -> Clients {
        let credentials = aws_sdk_s3::config::Credentials::new(
            self.settings.access_key.clone(),
            self.settings.secret_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER_NAME,
        );
        let region = aws_config::Region::new(self.settings.region.clone());

        let mut s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(region.clone())
            .credentials_provider(credentials.clone());
        if let Some(endpoint) = &self.settings.endpoint {
            s3_config = s3_config.endpoint_url(endpoint);
        }
        if self.settings.force_path_style {
            s3_config = s3_config.force_path_style(true);
        }

        let cloudfront = self.settings.cloudfront_distribution.as_ref().map(|_| {
            let config = aws_sdk_cloudfront::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(credentials)
                .build();
            aws_sdk_cloudfront::Client::from_conf(config)
        });

        Clients {
            s3: aws_sdk_s3::Client::from_conf(s3_config.build()),
            cloudfront,
        }
    }

    async fn delete_batch(&self, paths: &[String]) -> Result<(), DeployError> {
        let clients = self.clients()?;
        let first = paths.first().map(String::as_str).unwrap_or_default();
        let objects = paths
            .iter()
            .map(|path| ObjectIdentifier::builder().key(self.full_key(path)).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| write_err(first, OperationKind::Remove, e))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| write_err(first, OperationKind::Remove, e))?;

        let output = clients
            .s3
            .delete_objects()
            .bucket(&self.settings.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| write_err(first, OperationKind::Remove, e))?;

        if let Some(failed) = output.errors().first() {
            let key = failed.key().unwrap_or(first);
            let message = failed.message().unwrap_or("delete rejected").to_string();
            return Err(write_err(self.strip_prefix(key), OperationKind::Remove, message));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTransport for ObjectStorageTransport {
    fn strategy(&self) -> SyncStrategy {
        SyncStrategy::Replace
    }

    fn describe(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("s3://{}/{prefix}", self.settings.bucket),
            None => format!("s3://{}", self.settings.bucket),
        }
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.settings.bucket))]
    async fn connect(&mut self) -> Result<(), DeployError> {
        let clients = self.build_clients();
        clients
            .s3
            .head_bucket()
            .bucket(&self.settings.bucket)
            .send()
            .await
            .map_err(|e| connection_err(self.describe(), e))?;
        self.clients = Some(clients);
        info!(target = %self.describe(), "connected");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&mut self) -> Result<FileTreeSnapshot, DeployError> {
        let clients = self.clients()?;
        let mut snapshot = FileTreeSnapshot::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = clients
                .s3
                .list_objects_v2()
                .bucket(&self.settings.bucket)
                .set_prefix(self.list_prefix());
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|e| traversal_err(self.describe(), e))?;

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                if key.ends_with('/') {
                    continue;
                }
                let modified_at = object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), 0))
                    .unwrap_or_default();
                let size = object.size().unwrap_or_default().max(0) as u64;
                snapshot.insert(FileRecord::file(self.strip_prefix(key), size, modified_at));
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        debug!(objects = snapshot.len(), "listed bucket");
        Ok(snapshot)
    }

    #[instrument(skip(self, contents), fields(backend = "s3", bytes = contents.len()))]
    async fn put(&mut self, path: &str, contents: Vec<u8>) -> Result<(), DeployError> {
        let clients = self.clients()?;
        clients
            .s3
            .put_object()
            .bucket(&self.settings.bucket)
            .key(self.full_key(path))
            .body(ByteStream::from(contents))
            .content_type(content_type_for(path))
            .cache_control(cache_control_for(path))
            .send()
            .await
            .map_err(|e| write_err(path, OperationKind::Upload, e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn remove(&mut self, path: &str) -> Result<(), DeployError> {
        let clients = self.clients()?;
        clients
            .s3
            .delete_object()
            .bucket(&self.settings.bucket)
            .key(self.full_key(path))
            .send()
            .await
            .map_err(|e| write_err(path, OperationKind::Remove, e))?;
        Ok(())
    }

    #[instrument(skip(self, paths), fields(backend = "s3", count = paths.len()))]
    async fn remove_all(&mut self, paths: &[String]) -> Result<(), DeployError> {
        for batch in paths.chunks(DELETE_BATCH_SIZE) {
            self.delete_batch(batch).await?;
            debug!(deleted = batch.len(), "deleted batch");
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), DeployError> {
        let Some(distribution) = self.settings.cloudfront_distribution.clone() else {
            return Ok(());
        };
        let clients = self.clients()?;
        let Some(cloudfront) = &clients.cloudfront else {
            return Ok(());
        };
        let invalidation_err = |source: Box<dyn std::error::Error + Send + Sync>| {
            DeployError::Invalidation {
                distribution: distribution.clone(),
                source,
            }
        };

        let paths = Paths::builder()
            .quantity(1)
            .items("/*")
            .build()
            .map_err(|e| invalidation_err(e.into()))?;
        let batch = InvalidationBatch::builder()
            .caller_reference(format!("pressroom-{}", Utc::now().timestamp()))
            .paths(paths)
            .build()
            .map_err(|e| invalidation_err(e.into()))?;

        cloudfront
            .create_invalidation()
            .distribution_id(&distribution)
            .invalidation_batch(batch)
            .send()
            .await
            .map_err(|e| invalidation_err(e.into()))?;
        info!(distribution = %distribution, "created invalidation for /*");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DeployError> {
        self.clients = None;
        Ok(())
    }
}
