// backuptool/src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use crate::backup;
use crate::context::AppContext;
use crate::retention;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Runs scheduled backups forever. A cycle that produces no records is
/// logged and the loop keeps going; the next cycle starts a full interval
/// after the previous one finished, so slow dumps never overlap themselves.
pub async fn run_backup_loop(ctx: Arc<AppContext>) {
    let interval = ctx.config.dump_interval;
    loop {
        tracing::info!(targets = ctx.config.targets.len(), "starting backup cycle");
        let records = backup::run_all(Arc::clone(&ctx)).await;
        tracing::info!(
            succeeded = records.len(),
            failed = ctx.config.targets.len() - records.len(),
            "backup cycle finished"
        );
        tokio::time::sleep(interval).await;
    }
}

/// Runs retention sweeps forever, on a daily timer independent of the backup
/// cycle.
pub async fn run_retention_loop(ctx: Arc<AppContext>) {
    loop {
        retention::run_sweep(&ctx).await;
        tokio::time::sleep(RETENTION_SWEEP_INTERVAL).await;
    }
}
