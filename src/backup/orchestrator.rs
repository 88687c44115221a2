// backuptool/src/backup/orchestrator.rs
use std::sync::Arc;

use crate::backup::archive::{archive_dump, ArchiveArtifact};
use crate::backup::dump::produce_dump;
use crate::backup::validate::validate_dump;
use crate::config::{BackupTarget, EngineKind};
use crate::context::AppContext;
use crate::errors::{AppError, Result};
use crate::notify::BackupNotice;
use crate::storage::{file_exchange, UploadResult};

/// Aggregate of one successful pipeline run. Never retried in place; a
/// fresh run produces a fresh record.
#[derive(Debug)]
pub struct BackupRecord {
    pub target_name: String,
    pub engine: EngineKind,
    pub archive: ArchiveArtifact,
    pub uploads: Vec<UploadResult>,
}

impl BackupRecord {
    /// The file-exchange download URL, when that sink ran and succeeded.
    pub fn download_url(&self) -> Option<&str> {
        self.uploads
            .iter()
            .find(|u| u.sink == file_exchange::SINK_ID && u.succeeded)
            .and_then(|u| u.remote_ref.as_deref())
    }
}

/// Runs the full pipeline for one target: produce, validate, archive, fan
/// out. Each stage owns the artifact and cleans up on its own failure path.
async fn backup_target(
    ctx: &AppContext,
    target: &BackupTarget,
    manual: bool,
) -> Result<BackupRecord> {
    let dump = produce_dump(target, &ctx.config.dumps_dir).await?;
    validate_dump(&dump, target, ctx.config.min_dump_size).await?;
    let created_at = dump.created_at;
    let archive = archive_dump(dump).await?;
    let uploads = ctx.fanout.push(&archive, &target.name, manual).await;

    if !manual {
        let notice = BackupNotice {
            database: target.name.clone(),
            archive_name: archive.file_name().to_string(),
            created_at,
            remote_ref: uploads
                .iter()
                .find(|u| u.succeeded)
                .and_then(|u| u.remote_ref.clone()),
        };
        ctx.notifier.backup_completed(&notice).await;
    }

    Ok(BackupRecord {
        target_name: target.name.clone(),
        engine: target.engine,
        archive,
        uploads,
    })
}

/// Converts per-target outcomes into the surviving records. Failures are
/// logged with the target identity and dropped; they never abort siblings.
fn collect_records(outcomes: Vec<(String, Result<BackupRecord>)>) -> Vec<BackupRecord> {
    let mut records = Vec::new();
    for (name, outcome) in outcomes {
        match outcome {
            Ok(record) => records.push(record),
            Err(e) => tracing::error!(target = %name, error = %e, "backup pipeline failed"),
        }
    }
    records
}

/// Batch mode: one concurrent pipeline per configured target. There is no
/// cap on simultaneous pipelines; each spawns a dump-tool subprocess.
pub async fn run_all(ctx: Arc<AppContext>) -> Vec<BackupRecord> {
    tracing::info!(targets = ctx.config.targets.len(), "starting scheduled backup run");

    let mut handles = Vec::new();
    for target in ctx.config.targets.clone() {
        let ctx = Arc::clone(&ctx);
        let name = target.name.clone();
        let handle = tokio::spawn(async move { backup_target(&ctx, &target, false).await });
        handles.push((name, handle));
    }

    let mut outcomes = Vec::new();
    for (name, handle) in handles {
        let outcome = match handle.await {
            Ok(result) => result,
            Err(e) => Err(AppError::Config(format!("pipeline task panicked: {e}"))),
        };
        outcomes.push((name, outcome));
    }

    let records = collect_records(outcomes);
    tracing::info!(succeeded = records.len(), "scheduled backup run finished");
    records
}

/// Operator-triggered backup of a single named target, additionally pushed
/// to the file exchange so the requester gets a download URL.
pub async fn run_single(ctx: &AppContext, name: &str) -> Result<BackupRecord> {
    let target = ctx
        .config
        .find_target(name)
        .ok_or_else(|| AppError::InputValidation(format!("no configured target named '{name}'")))?
        .clone();
    backup_target(ctx, &target, true).await
}
