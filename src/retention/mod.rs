// backuptool/src/retention/mod.rs
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use walkdir::WalkDir;

use crate::context::AppContext;
use crate::errors::{AppError, Result};

/// Local archives are kept for 30 days; remote copies for 31. The extra day
/// is a clock-skew buffer so a remote copy is never deleted before its local
/// counterpart would be.
pub const LOCAL_RETENTION_DAYS: i64 = 30;
pub const REMOTE_RETENTION_DAYS: i64 = 31;

pub fn is_expired(modified: DateTime<Utc>, now: DateTime<Utc>, max_age_days: i64) -> bool {
    now - modified > Duration::days(max_age_days)
}

fn select_expired(
    files: impl IntoIterator<Item = (PathBuf, DateTime<Utc>)>,
    now: DateTime<Utc>,
    max_age_days: i64,
) -> Vec<PathBuf> {
    files
        .into_iter()
        .filter(|(_, modified)| is_expired(*modified, now, max_age_days))
        .map(|(path, _)| path)
        .collect()
}

fn local_archives(dumps_dir: &Path) -> Vec<(PathBuf, DateTime<Utc>)> {
    WalkDir::new(dumps_dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "zip")
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.into_path(), DateTime::<Utc>::from(modified)))
        })
        .collect()
}

/// Deletes local archives under the dump root older than the local
/// threshold. Per-file failures are logged and skipped.
pub async fn sweep_local(dumps_dir: &Path, now: DateTime<Utc>) -> Result<usize> {
    let dir = dumps_dir.to_path_buf();
    let expired = tokio::task::spawn_blocking(move || {
        select_expired(local_archives(&dir), now, LOCAL_RETENTION_DAYS)
    })
    .await
    .map_err(|e| AppError::Config(format!("blocking sweep task failed: {e}")))?;

    let mut deleted = 0;
    for path in expired {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(file = %path.display(), "deleted expired local archive");
                deleted += 1;
            }
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "failed to delete local archive");
            }
        }
    }
    Ok(deleted)
}

/// One full sweep: local first, then the remote sink if configured. Runs on
/// its own timer, independent of backup runs.
pub async fn run_sweep(ctx: &AppContext) {
    let now = Utc::now();

    match sweep_local(&ctx.config.dumps_dir, now).await {
        Ok(count) => tracing::info!(deleted = count, "local retention sweep finished"),
        Err(e) => tracing::error!(error = %e, "local retention sweep failed"),
    }

    if let Some(disk) = ctx.fanout.remote_disk() {
        match disk.cleanup_old_backups(REMOTE_RETENTION_DAYS, now).await {
            Ok(count) => tracing::info!(deleted = count, "remote retention sweep finished"),
            Err(e) => tracing::error!(error = %e, "remote retention sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_items_past_the_threshold_are_selected() {
        let now = Utc::now();
        let ages_days = [10, 29, 30, 31, 40];
        let files: Vec<(PathBuf, DateTime<Utc>)> = ages_days
            .iter()
            .map(|d| {
                (
                    PathBuf::from(format!("app_{d}.zip")),
                    now - Duration::days(*d),
                )
            })
            .collect();

        let expired = select_expired(files, now, 30);
        assert_eq!(
            expired,
            vec![PathBuf::from("app_31.zip"), PathBuf::from("app_40.zip")]
        );
    }

    #[test]
    fn exactly_at_threshold_is_kept() {
        let now = Utc::now();
        assert!(!is_expired(now - Duration::days(30), now, 30));
        assert!(is_expired(now - Duration::days(30) - Duration::seconds(1), now, 30));
    }

    #[tokio::test]
    async fn fresh_archives_survive_a_sweep() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_dir = dir.path().join("shop");
        std::fs::create_dir_all(&db_dir)?;
        std::fs::write(db_dir.join("shop_20240101_000000.zip"), b"zip")?;

        let deleted = sweep_local(dir.path(), Utc::now()).await?;
        assert_eq!(deleted, 0);
        assert!(db_dir.join("shop_20240101_000000.zip").exists());
        Ok(())
    }

    #[tokio::test]
    async fn sweep_deletes_files_with_old_mtimes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_dir = dir.path().join("shop");
        std::fs::create_dir_all(&db_dir)?;
        std::fs::write(db_dir.join("shop_old.zip"), b"zip")?;

        // A "now" 40 days in the future makes the just-written file expired.
        let future = Utc::now() + Duration::days(40);
        let deleted = sweep_local(dir.path(), future).await?;
        assert_eq!(deleted, 1);
        assert!(!db_dir.join("shop_old.zip").exists());
        Ok(())
    }
}
