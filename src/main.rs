//! Database backup orchestration tool
//!
//! Dumps configured databases on a schedule, archives and uploads the
//! results, prunes old copies, and interactively deploys stored dumps onto a
//! destination server.

// backuptool/src/main.rs
mod backup;
mod config;
mod context;
mod deploy;
mod errors;
mod notify;
mod process;
mod retention;
mod scheduler;
mod storage;

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::context::AppContext;
use crate::deploy::machine::DeployInput;
use crate::deploy::DeploymentFlow;

#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load_from_env().context("failed to load configuration")?;
    let ctx = Arc::new(AppContext::new(config).context("failed to initialise application")?);

    let args: Vec<String> = env::args().collect();
    let choice = match args.get(1) {
        Some(arg) => arg.trim().to_string(),
        None => prompt_choice()?,
    };

    match choice.as_str() {
        "serve" => serve(ctx).await,
        "backup" => backup_all(ctx).await,
        "backup-db" => {
            let name = args
                .get(2)
                .context("usage: backuptool backup-db <name>")?;
            backup_one(&ctx, name).await
        }
        "deploy" => deploy_interactive(ctx, args.get(2).map(String::as_str)).await,
        "sweep" => {
            retention::run_sweep(&ctx).await;
            Ok(())
        }
        "targets" => {
            list_targets(&ctx);
            Ok(())
        }
        other => anyhow::bail!(
            "unknown command '{other}'; expected serve, backup, backup-db, deploy, sweep or targets"
        ),
    }
}

fn prompt_choice() -> Result<String> {
    use std::io::{stdin, stdout, Write};

    println!("Select an operation:");
    println!("  serve      run scheduled backups and retention sweeps");
    println!("  backup     back up every configured database once");
    println!("  deploy     deploy a stored dump to a destination server");
    println!("  sweep      run one retention sweep");
    println!("  targets    list configured databases");
    print!("Enter your choice: ");
    stdout().flush().context("failed to flush stdout")?;

    let mut input = String::new();
    stdin()
        .read_line(&mut input)
        .context("failed to read input")?;
    Ok(input.trim().to_string())
}

/// Scheduled mode: backup and retention loops run until the process is
/// stopped.
async fn serve(ctx: Arc<AppContext>) -> Result<()> {
    if ctx.config.targets.is_empty() {
        anyhow::bail!("no backup targets configured; set POSTGRES_DB_1_* or MYSQL_DB_1_* variables");
    }
    tracing::info!(
        targets = ctx.config.targets.len(),
        interval_secs = ctx.config.dump_interval.as_secs(),
        "scheduler starting"
    );

    let backup_loop = tokio::spawn(scheduler::run_backup_loop(Arc::clone(&ctx)));
    let retention_loop = tokio::spawn(scheduler::run_retention_loop(ctx));
    let (a, b) = tokio::join!(backup_loop, retention_loop);
    a.context("backup loop terminated")?;
    b.context("retention loop terminated")?;
    Ok(())
}

async fn backup_all(ctx: Arc<AppContext>) -> Result<()> {
    let total = ctx.config.targets.len();
    if total == 0 {
        anyhow::bail!("no backup targets configured");
    }
    let records = backup::run_all(ctx).await;
    println!("{} of {total} databases backed up", records.len());
    for record in &records {
        println!("  {} -> {}", record.target_name, record.archive.path.display());
    }
    if records.len() < total {
        anyhow::bail!("{} backups failed; see the log", total - records.len());
    }
    Ok(())
}

async fn backup_one(ctx: &AppContext, name: &str) -> Result<()> {
    let record = backup::run_single(ctx, name)
        .await
        .with_context(|| format!("backup of '{name}' failed"))?;
    println!("archive: {}", record.archive.path.display());
    if let Some(url) = record.download_url() {
        println!("download: {url}");
    }
    Ok(())
}

fn list_targets(ctx: &AppContext) {
    if ctx.config.targets.is_empty() {
        println!("no backup targets configured");
        return;
    }
    for target in &ctx.config.targets {
        println!(
            "{:<12} {} at {}:{}",
            target.engine.label(),
            target.name,
            target.host,
            target.port
        );
    }
}

/// Terminal front end for the deployment workflow. Each line of input is one
/// transition; the session ends at a terminal state.
async fn deploy_interactive(ctx: Arc<AppContext>, dump_ref: Option<&str>) -> Result<()> {
    use std::io::{stdin, stdout, Write};

    let flow = DeploymentFlow::new(ctx);
    let (mut session, prompt) = flow.start();
    println!("{prompt} (type 'back' or 'cancel' at any point)");

    let mut pending_ref = dump_ref.map(str::to_string);
    loop {
        let line = match pending_ref.take() {
            Some(r) => r,
            None => {
                print!("> ");
                stdout().flush().context("failed to flush stdout")?;
                let mut input = String::new();
                if stdin().read_line(&mut input).context("failed to read input")? == 0 {
                    return Ok(());
                }
                input.trim().to_string()
            }
        };

        let input = match line.as_str() {
            "cancel" => DeployInput::Cancel,
            "back" => DeployInput::Back,
            "retry" => DeployInput::Retry,
            _ if session.state == deploy::session::DeployState::SelectingDump => {
                match flow.prepare_dump(&line).await {
                    Ok(input) => input,
                    Err(e) => {
                        println!("{e}");
                        continue;
                    }
                }
            }
            _ => DeployInput::Text(line),
        };

        let outcome = flow.handle(session, input).await;
        session = outcome.session;
        for message in outcome.messages {
            println!("{message}");
        }
        if session.state.is_terminal() {
            return Ok(());
        }
    }
}
