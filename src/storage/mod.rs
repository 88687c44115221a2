// backuptool/src/storage/mod.rs
pub mod file_exchange;
pub mod remote_disk;
pub mod retry;

use crate::backup::archive::ArchiveArtifact;
use crate::config::AppConfig;
use crate::errors::Result;
use file_exchange::FileExchangeClient;
use remote_disk::RemoteDiskClient;

/// Outcome of one sink. `succeeded == false` with no remote ref means the
/// sink skipped the object (already present) or failed after its own retry
/// budget; either way the backup record survives.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub sink: &'static str,
    pub succeeded: bool,
    pub remote_ref: Option<String>,
}

/// Pushes archives to every configured sink independently. A sink that is
/// not configured is skipped silently; a sink that fails is logged and
/// reported as non-success without affecting its siblings.
pub struct UploadFanout {
    remote_disk: Option<RemoteDiskClient>,
    file_exchange: Option<FileExchangeClient>,
}

impl UploadFanout {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let remote_disk = match &config.remote_disk {
            Some(cfg) => Some(RemoteDiskClient::new(cfg.clone())?),
            None => None,
        };
        let file_exchange = match &config.file_exchange {
            Some(cfg) => Some(FileExchangeClient::new(cfg.clone())?),
            None => None,
        };
        Ok(UploadFanout {
            remote_disk,
            file_exchange,
        })
    }

    pub fn remote_disk(&self) -> Option<&RemoteDiskClient> {
        self.remote_disk.as_ref()
    }

    /// Fans an archive out to the configured sinks. The file exchange is
    /// only used for operator-requested backups (`include_exchange`), where
    /// the download URL is handed back to the requester.
    pub async fn push(
        &self,
        archive: &ArchiveArtifact,
        db_name: &str,
        include_exchange: bool,
    ) -> Vec<UploadResult> {
        let mut results = Vec::new();

        if let Some(disk) = &self.remote_disk {
            match disk.upload_archive(archive, db_name).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!(db = db_name, error = %e, "remote disk upload failed");
                    results.push(UploadResult {
                        sink: remote_disk::SINK_ID,
                        succeeded: false,
                        remote_ref: None,
                    });
                }
            }
        }

        if include_exchange {
            if let Some(exchange) = &self.file_exchange {
                match exchange.upload_archive(archive).await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        tracing::error!(db = db_name, error = %e, "file exchange upload failed");
                        results.push(UploadResult {
                            sink: file_exchange::SINK_ID,
                            succeeded: false,
                            remote_ref: None,
                        });
                    }
                }
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteDiskConfig;
    use crate::errors::AppError;
    use crate::storage::retry::RetryPolicy;
    use std::path::PathBuf;
    use std::time::Duration;

    #[tokio::test]
    async fn failed_sink_is_reported_as_non_success() {
        // A port with nothing listening behind it.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = RemoteDiskClient::with_retry(
            RemoteDiskConfig {
                token: "test-token".into(),
                backup_folder: "/Backups".into(),
                api_base: format!("http://{addr}/v1/disk"),
            },
            RetryPolicy {
                max_attempts: 2,
                delay: Duration::ZERO,
                retryable: AppError::is_transient,
            },
        )
        .unwrap();
        let fanout = UploadFanout {
            remote_disk: Some(client),
            file_exchange: None,
        };

        let archive = ArchiveArtifact {
            path: PathBuf::from("/nonexistent/shop_20240101_000000.zip"),
            origin_name: "shop_20240101_000000.sql".into(),
        };
        let results = fanout.push(&archive, "shop", false).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].sink, remote_disk::SINK_ID);
        assert!(!results[0].succeeded);
        assert!(results[0].remote_ref.is_none());
    }
}
