// backuptool/src/notify.rs
use async_trait::async_trait;
use chrono::{DateTime, Local};

/// Summary of one finished backup, handed to the operator channel.
#[derive(Debug, Clone)]
pub struct BackupNotice {
    pub database: String,
    pub archive_name: String,
    pub created_at: DateTime<Local>,
    pub remote_ref: Option<String>,
}

/// Seam for the operator notification channel. The chat frontend is the
/// external collaborator expected to implement this; the default just logs.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn backup_completed(&self, notice: &BackupNotice);
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn backup_completed(&self, notice: &BackupNotice) {
        tracing::info!(
            database = %notice.database,
            archive = %notice.archive_name,
            remote = notice.remote_ref.as_deref().unwrap_or("not uploaded"),
            "backup completed"
        );
    }
}
