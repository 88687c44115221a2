// backuptool/src/storage/remote_disk.rs
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::backup::archive::ArchiveArtifact;
use crate::config::RemoteDiskConfig;
use crate::errors::{AppError, Result};
use crate::storage::retry::{RetryPolicy, UPLOAD_RETRY};
use crate::storage::UploadResult;

pub const SINK_ID: &str = "remote_disk";

const META_TIMEOUT: Duration = Duration::from_secs(10);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const LIST_LIMIT: &str = "1000";

/// Client for the remote-disk REST contract: existence check, idempotent
/// folder creation, upload-URL negotiation, PUT upload and delete-by-path.
#[derive(Debug, Clone)]
pub struct RemoteDiskClient {
    http: Client,
    config: RemoteDiskConfig,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct UploadTicket {
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemoteResource {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourceListing {
    #[serde(rename = "_embedded")]
    embedded: Option<EmbeddedItems>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedItems {
    items: Vec<RemoteResource>,
}

/// 5xx and 429 may clear up on their own; everything else (auth, bad
/// request) will not and must abort the sink without retry.
fn status_error(status: StatusCode, body: String) -> AppError {
    let reason = format!("{status}: {body}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        AppError::UploadTransient { sink: SINK_ID, reason }
    } else {
        AppError::UploadPermanent { sink: SINK_ID, reason }
    }
}

impl RemoteDiskClient {
    pub fn new(config: RemoteDiskConfig) -> Result<Self> {
        Self::with_retry(config, UPLOAD_RETRY)
    }

    pub fn with_retry(config: RemoteDiskConfig, retry: RetryPolicy) -> Result<Self> {
        let http = Client::builder().build()?;
        Ok(RemoteDiskClient { http, config, retry })
    }

    fn auth(&self) -> String {
        format!("OAuth {}", self.config.token)
    }

    fn resources_url(&self) -> String {
        format!("{}/resources", self.config.api_base)
    }

    pub async fn exists(&self, remote_path: &str) -> Result<bool> {
        let response = self
            .http
            .get(self.resources_url())
            .query(&[("path", format!("disk:{remote_path}"))])
            .header("Authorization", self.auth())
            .timeout(META_TIMEOUT)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(status_error(status, response.text().await.unwrap_or_default())),
        }
    }

    pub async fn ensure_folder(&self, remote_path: &str) -> Result<()> {
        if self.exists(remote_path).await? {
            return Ok(());
        }
        let response = self
            .http
            .put(self.resources_url())
            .query(&[("path", format!("disk:{remote_path}"))])
            .header("Authorization", self.auth())
            .timeout(META_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        // A concurrent pipeline may have created the folder in between.
        if status.is_success() || status == StatusCode::CONFLICT {
            tracing::debug!(folder = remote_path, "remote folder ensured");
            Ok(())
        } else {
            Err(status_error(status, response.text().await.unwrap_or_default()))
        }
    }

    async fn request_upload_url(&self, remote_path: &str) -> Result<String> {
        let response = self
            .http
            .get(format!("{}/resources/upload", self.config.api_base))
            .query(&[
                ("path", format!("disk:{remote_path}")),
                ("overwrite", "false".to_string()),
            ])
            .header("Authorization", self.auth())
            .timeout(META_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }
        let ticket: UploadTicket = response.json().await?;
        ticket.href.ok_or_else(|| AppError::UploadPermanent {
            sink: SINK_ID,
            reason: "upload ticket did not contain an upload URL".into(),
        })
    }

    async fn put_file(&self, upload_url: &str, file_path: &Path) -> Result<()> {
        let file = tokio::fs::File::open(file_path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .http
            .put(upload_url)
            .body(body)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(status_error(status, response.text().await.unwrap_or_default()))
        }
    }

    pub async fn delete(&self, remote_path: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.resources_url())
            .query(&[
                ("path", remote_path.to_string()),
                ("permanently", "true".to_string()),
            ])
            .header("Authorization", self.auth())
            .timeout(META_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(status_error(status, response.text().await.unwrap_or_default()))
        }
    }

    pub async fn list_folder(&self, remote_path: &str) -> Result<Vec<RemoteResource>> {
        let response = self
            .http
            .get(self.resources_url())
            .query(&[
                ("path", format!("disk:{remote_path}")),
                ("limit", LIST_LIMIT.to_string()),
            ])
            .header("Authorization", self.auth())
            .timeout(META_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }
        let listing: ResourceListing = response.json().await?;
        Ok(listing.embedded.map(|e| e.items).unwrap_or_default())
    }

    /// Uploads an archive under `<backup_folder>/<db_name>/`. If the remote
    /// object already exists the upload is skipped and reported as
    /// non-success with no error, so historical backups are never
    /// overwritten by a rerun.
    pub async fn upload_archive(
        &self,
        archive: &ArchiveArtifact,
        db_name: &str,
    ) -> Result<UploadResult> {
        let root = self.config.backup_folder.trim_end_matches('/');
        let db_folder = format!("{root}/{db_name}");
        let remote_path = format!("{db_folder}/{}", archive.file_name());

        self.retry.run(|| self.ensure_folder(root)).await?;
        self.retry.run(|| self.ensure_folder(&db_folder)).await?;

        if self.retry.run(|| self.exists(&remote_path)).await? {
            tracing::warn!(path = %remote_path, "remote object already exists, skipping upload");
            return Ok(UploadResult {
                sink: SINK_ID,
                succeeded: false,
                remote_ref: None,
            });
        }

        self.retry
            .run(|| async {
                let href = self.request_upload_url(&remote_path).await?;
                self.put_file(&href, &archive.path).await
            })
            .await?;

        tracing::info!(path = %remote_path, "archive uploaded to remote disk");
        Ok(UploadResult {
            sink: SINK_ID,
            succeeded: true,
            remote_ref: Some(remote_path),
        })
    }

    /// Deletes remote archives older than `max_age_days` from every
    /// per-database subfolder of the backup folder. Individual delete
    /// failures are logged and skipped so one bad object cannot stall the
    /// sweep.
    pub async fn cleanup_old_backups(&self, max_age_days: i64, now: DateTime<Utc>) -> Result<usize> {
        let root = self.config.backup_folder.trim_end_matches('/');
        let mut deleted = 0;

        for entry in self.list_folder(root).await? {
            if entry.kind != "dir" {
                continue;
            }
            let folder = entry.path.trim_start_matches("disk:").to_string();
            for file in self.list_folder(&folder).await? {
                if file.kind != "file" {
                    continue;
                }
                let Some(modified) = file
                    .modified
                    .as_deref()
                    .and_then(|m| DateTime::parse_from_rfc3339(m).ok())
                else {
                    tracing::warn!(path = %file.path, "remote object has no parseable mtime");
                    continue;
                };
                if crate::retention::is_expired(modified.with_timezone(&Utc), now, max_age_days) {
                    match self.delete(&file.path).await {
                        Ok(()) => {
                            tracing::info!(path = %file.path, "deleted expired remote archive");
                            deleted += 1;
                        }
                        Err(e) => {
                            tracing::error!(path = %file.path, error = %e, "failed to delete remote archive");
                        }
                    }
                }
            }
        }
        Ok(deleted)
    }
}
