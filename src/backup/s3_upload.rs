// pgbackup/src/backup/s3_upload.rs
use anyhow::{Context, bail};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::primitives::ByteStream;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::db_dump::BackupArtifact;
use crate::errors::{BackupError, Result};

/// Destination for finished artifacts. Written to, never read from.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads the file at `file_path` as a single object.
    async fn put_file(&self, bucket: &str, key: &str, file_path: &Path) -> anyhow::Result<()>;

    /// Location reported back to the caller for a stored object.
    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("s3://{}/{}", bucket, key)
    }
}

/// Amazon S3 or any S3-compatible service.
pub struct S3ObjectStore {
    client: s3::Client,
}

impl S3ObjectStore {
    /// Builds a client from the shared SDK config, optionally against a custom endpoint.
    pub fn new(sdk_config: &aws_config::SdkConfig, endpoint_url: Option<&str>) -> Self {
        let mut builder = s3::config::Builder::from(sdk_config);
        if let Some(endpoint) = endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self {
            client: s3::Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(&self, bucket: &str, key: &str, file_path: &Path) -> anyhow::Result<()> {
        let body = ByteStream::from_path(file_path)
            .await
            .with_context(|| {
                format!("Failed to create ByteStream from file: {}", file_path.display())
            })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/gzip")
            .body(body)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to upload file {} to S3 bucket {} with key {}",
                    file_path.display(),
                    bucket,
                    key
                )
            })?;
        Ok(())
    }
}

/// Copies artifacts under `{root}/{bucket}/{key}`, for runs without object storage.
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> anyhow::Result<PathBuf> {
        for part in [bucket, key] {
            if part.is_empty() || part.starts_with('/') || part.split('/').any(|seg| seg == "..") {
                bail!("Invalid object location: {}/{}", bucket, key);
            }
        }
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    async fn put_file(&self, bucket: &str, key: &str, file_path: &Path) -> anyhow::Result<()> {
        let dest = self.object_path(bucket, key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        tokio::fs::copy(file_path, &dest)
            .await
            .with_context(|| {
                format!("Failed to copy {} to {}", file_path.display(), dest.display())
            })?;
        Ok(())
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        self.root.join(bucket).join(key).display().to_string()
    }
}

/// Uploads the artifact under its remote key and removes the local copy.
///
/// If the upload fails the local file is left in place and the error returned.
pub async fn publish_artifact(
    store: &dyn ObjectStore,
    artifact: &BackupArtifact,
    bucket: &str,
) -> Result<String> {
    info!(
        database = %artifact.name,
        bucket,
        key = %artifact.remote_key,
        timestamp = %artifact.timestamp,
        size_bytes = artifact.size_bytes,
        "Uploading artifact"
    );

    store
        .put_file(bucket, &artifact.remote_key, &artifact.local_path)
        .await
        .map_err(|e| BackupError::Upload(format!("{:#}", e)))?;

    // The object is durable at this point; a leftover scratch file is only a warning.
    if let Err(e) = tokio::fs::remove_file(&artifact.local_path).await {
        warn!(
            database = %artifact.name,
            path = %artifact.local_path.display(),
            error = %e,
            "Failed to remove local artifact after upload"
        );
    }

    let remote_path = store.object_url(bucket, &artifact.remote_key);
    info!(
        database = %artifact.name,
        "Uploaded {} bytes -> {}",
        artifact.size_bytes,
        remote_path
    );
    Ok(remote_path)
}
