// backuptool/src/process.rs
use std::ffi::OsStr;

use tokio::process::Command;

use crate::errors::Result;

/// Captured outcome of one external tool invocation.
#[derive(Debug)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs an external command with extra environment variables, capturing exit
/// status and both output streams. Waits asynchronously so concurrent
/// pipelines are never blocked on a slow dump tool.
pub async fn run_command<I, S>(
    program: impl AsRef<OsStr>,
    args: I,
    envs: &[(&str, &str)],
) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let output = cmd.output().await?;
    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
