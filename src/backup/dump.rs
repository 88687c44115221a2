// backuptool/src/backup/dump.rs
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use which::which;

use crate::config::BackupTarget;
use crate::config::EngineKind;
use crate::errors::{AppError, Result};
use crate::process::run_command;

/// A freshly produced dump file. Owned by whichever pipeline stage currently
/// holds it; the stage that decides it is no longer needed deletes it.
#[derive(Debug)]
pub struct DumpArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Local>,
}

fn find_tool(name: &'static str) -> Result<PathBuf> {
    which(name).map_err(|_| {
        AppError::Config(format!(
            "{name} executable not found in PATH; install the database client tools"
        ))
    })
}

/// Builds the engine-specific dump invocation. The password is deliberately
/// absent here; it is injected through the engine's password env var.
fn dump_args(target: &BackupTarget, dump_file: &Path) -> Vec<OsString> {
    let port = target.port.to_string();
    match target.engine {
        EngineKind::Postgres => vec![
            "-h".into(),
            target.host.clone().into(),
            "-p".into(),
            port.into(),
            "-U".into(),
            target.user.clone().into(),
            "-d".into(),
            target.name.clone().into(),
            "--schema=public".into(),
            "--no-owner".into(),
            "--no-privileges".into(),
            "-f".into(),
            dump_file.into(),
        ],
        EngineKind::MySql => vec![
            "-h".into(),
            target.host.clone().into(),
            "-P".into(),
            port.into(),
            "-u".into(),
            target.user.clone().into(),
            target.name.clone().into(),
            "--quick".into(),
            "--lock-tables=false".into(),
            "-r".into(),
            dump_file.into(),
        ],
    }
}

/// Invokes the engine's dump tool and returns the produced artifact.
///
/// A non-zero exit deletes whatever partial file the tool left behind and
/// yields `ToolInvocationFailed`; a clean exit with no file on disk yields
/// `ArtifactNotProduced`.
pub async fn produce_dump(target: &BackupTarget, dumps_dir: &Path) -> Result<DumpArtifact> {
    let dump_dir = dumps_dir.join(&target.name);
    tokio::fs::create_dir_all(&dump_dir).await?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let dump_file = dump_dir.join(format!("{}_{}.sql", target.name, timestamp));

    let tool = find_tool(target.engine.dump_tool())?;
    let args = dump_args(target, &dump_file);

    tracing::debug!(
        target = %target.display_name(),
        tool = %tool.display(),
        file = %dump_file.display(),
        "producing dump"
    );

    let output = run_command(
        &tool,
        &args,
        &[(target.engine.password_env(), target.password.as_str())],
    )
    .await?;

    if !output.success() {
        if tokio::fs::try_exists(&dump_file).await.unwrap_or(false) {
            tracing::warn!(file = %dump_file.display(), "removing failed dump");
            tokio::fs::remove_file(&dump_file).await?;
        }
        return Err(AppError::ToolInvocationFailed {
            tool: target.engine.dump_tool().to_string(),
            stderr: output.stderr,
        });
    }

    let metadata = match tokio::fs::metadata(&dump_file).await {
        Ok(m) => m,
        Err(_) => return Err(AppError::ArtifactNotProduced(dump_file)),
    };

    Ok(DumpArtifact {
        path: dump_file,
        size_bytes: metadata.len(),
        created_at: Local::now(),
    })
}
