// backuptool/src/deploy/restore.rs
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use which::which;

use crate::config::EngineKind;
use crate::errors::{AppError, Result};
use crate::process::run_command;

/// Everything the executor needs about the destination. Built from a
/// session whose state machine has already validated each field.
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub dump_path: PathBuf,
    pub engine: EngineKind,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub overwrite: bool,
}

fn client_tool(engine: EngineKind) -> Result<PathBuf> {
    which(engine.client_tool()).map_err(|_| {
        AppError::Config(format!(
            "{} executable not found in PATH; install the database client tools",
            engine.client_tool()
        ))
    })
}

/// Admin statement invocation (run against the server, not the target
/// database).
fn admin_args(req: &RestoreRequest, statement: &str) -> Vec<OsString> {
    let port = req.port.to_string();
    match req.engine {
        EngineKind::Postgres => vec![
            "-h".into(),
            req.host.clone().into(),
            "-p".into(),
            port.into(),
            "-U".into(),
            req.user.clone().into(),
            "-d".into(),
            "postgres".into(),
            "-c".into(),
            statement.into(),
        ],
        EngineKind::MySql => vec![
            "-h".into(),
            req.host.clone().into(),
            "-P".into(),
            port.into(),
            "-u".into(),
            req.user.clone().into(),
            "-e".into(),
            statement.into(),
        ],
    }
}

fn existence_args(req: &RestoreRequest) -> Vec<OsString> {
    match req.engine {
        EngineKind::Postgres => {
            let mut args = admin_args(
                req,
                &format!("SELECT 1 FROM pg_database WHERE datname = '{}';", req.dbname),
            );
            args.insert(args.len() - 2, "-t".into());
            args
        }
        EngineKind::MySql => {
            let mut args = admin_args(req, &format!("SHOW DATABASES LIKE '{}';", req.dbname));
            args.insert(args.len() - 2, "--batch".into());
            args
        }
    }
}

fn load_args(req: &RestoreRequest) -> Vec<OsString> {
    let port = req.port.to_string();
    match req.engine {
        EngineKind::Postgres => vec![
            "-h".into(),
            req.host.clone().into(),
            "-p".into(),
            port.into(),
            "-U".into(),
            req.user.clone().into(),
            "-d".into(),
            req.dbname.clone().into(),
            "-f".into(),
            req.dump_path.clone().into(),
        ],
        EngineKind::MySql => vec![
            "-h".into(),
            req.host.clone().into(),
            "-P".into(),
            port.into(),
            "-u".into(),
            req.user.clone().into(),
            "-D".into(),
            req.dbname.clone().into(),
            format!("--execute=source {}", req.dump_path.display()).into(),
        ],
    }
}

fn credential_env(req: &RestoreRequest) -> [(&'static str, &str); 1] {
    [(req.engine.password_env(), req.password.as_str())]
}

/// Database names may contain '-', which is only legal in admin statements
/// as a quoted identifier. The name itself is restricted to identifier
/// characters upstream, so no quote escaping is needed here.
fn quote_identifier(engine: EngineKind, name: &str) -> String {
    match engine {
        EngineKind::Postgres => format!("\"{name}\""),
        EngineKind::MySql => format!("`{name}`"),
    }
}

/// Read-only check whether the destination database exists, used to gate
/// the overwrite confirmation.
pub async fn check_database_exists(req: &RestoreRequest) -> Result<bool> {
    let tool = client_tool(req.engine)?;
    let output = run_command(&tool, existence_args(req), &credential_env(req)).await?;
    if !output.success() {
        return Err(AppError::ExistenceCheckFailed {
            dbname: req.dbname.clone(),
            stderr: output.stderr,
        });
    }
    Ok(!output.stdout.trim().is_empty())
}

async fn run_admin_statement(req: &RestoreRequest, statement: &str) -> Result<()> {
    let tool = client_tool(req.engine)?;
    let output = run_command(&tool, admin_args(req, statement), &credential_env(req)).await?;
    if !output.success() {
        return Err(AppError::DestructiveOperationFailed {
            dbname: req.dbname.clone(),
            stderr: output.stderr,
        });
    }
    Ok(())
}

/// Loads the dump into the destination. With overwrite requested, the
/// destination is dropped and recreated first as two individually-checked
/// operations; a failure at either aborts before any load attempt.
///
/// A failed load copies the dump into the quarantine directory for offline
/// diagnosis and leaves the live dump in place so the operator can retry.
pub async fn restore_dump(req: &RestoreRequest, quarantine_dir: &Path) -> Result<()> {
    if req.overwrite {
        tracing::debug!(db = %req.dbname, host = %req.host, "dropping and recreating destination");
        let ident = quote_identifier(req.engine, &req.dbname);
        run_admin_statement(req, &format!("DROP DATABASE IF EXISTS {ident};")).await?;
        run_admin_statement(req, &format!("CREATE DATABASE {ident};")).await?;
    }

    let tool = client_tool(req.engine)?;
    let output = run_command(&tool, load_args(req), &credential_env(req)).await?;
    if !output.success() {
        quarantine_dump(&req.dump_path, quarantine_dir).await;
        return Err(AppError::LoadFailed {
            stderr: output.stderr,
        });
    }

    tracing::info!(
        db = %req.dbname,
        host = %req.host,
        port = req.port,
        "dump deployed"
    );
    Ok(())
}

/// Preserves a dump implicated in a failed load for offline diagnosis. Best
/// effort: a quarantine failure is logged, not propagated, since the load
/// error is what the operator needs to see.
async fn quarantine_dump(dump_path: &Path, quarantine_dir: &Path) {
    let result = async {
        tokio::fs::create_dir_all(quarantine_dir).await?;
        let file_name = dump_path
            .file_name()
            .ok_or_else(|| AppError::Config(format!("dump has no file name: {}", dump_path.display())))?;
        tokio::fs::copy(dump_path, quarantine_dir.join(file_name)).await?;
        Ok::<(), AppError>(())
    }
    .await;

    match result {
        Ok(()) => tracing::debug!(
            dump = %dump_path.display(),
            dir = %quarantine_dir.display(),
            "dump preserved in quarantine"
        ),
        Err(e) => tracing::error!(error = %e, "failed to quarantine dump"),
    }
}
