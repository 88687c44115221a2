// backuptool/src/storage/file_exchange.rs
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use crate::backup::archive::ArchiveArtifact;
use crate::config::FileExchangeConfig;
use crate::errors::{AppError, Result};
use crate::storage::retry::UPLOAD_RETRY;
use crate::storage::UploadResult;

pub const SINK_ID: &str = "file_exchange";

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the file-exchange contract: one multipart upload returning a
/// JSON object with a download URL. Any other response shape is a sink
/// failure.
#[derive(Debug, Clone)]
pub struct FileExchangeClient {
    http: Client,
    config: FileExchangeConfig,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    url: Option<String>,
}

impl FileExchangeClient {
    pub fn new(config: FileExchangeConfig) -> Result<Self> {
        let http = Client::builder().build()?;
        Ok(FileExchangeClient { http, config })
    }

    async fn upload_once(&self, archive: &ArchiveArtifact) -> Result<String> {
        let bytes = tokio::fs::read(&archive.path).await?;
        let part = Part::bytes(bytes)
            .file_name(archive.file_name().to_string())
            .mime_str("application/zip")?;
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(&self.config.api_url)
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = format!("{status}: {body}");
            return Err(if status.is_server_error() {
                AppError::UploadTransient { sink: SINK_ID, reason }
            } else {
                AppError::UploadPermanent { sink: SINK_ID, reason }
            });
        }

        let parsed: ExchangeResponse = response.json().await?;
        parsed.url.ok_or_else(|| AppError::UploadPermanent {
            sink: SINK_ID,
            reason: "response did not contain a download url".into(),
        })
    }

    /// Uploads an archive and returns the download URL the exchange handed
    /// back.
    pub async fn upload_archive(&self, archive: &ArchiveArtifact) -> Result<UploadResult> {
        let url = UPLOAD_RETRY.run(|| self.upload_once(archive)).await?;
        tracing::info!(archive = %archive.file_name(), %url, "archive uploaded to file exchange");
        Ok(UploadResult {
            sink: SINK_ID,
            succeeded: true,
            remote_ref: Some(url),
        })
    }
}
