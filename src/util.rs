//! Shared utility functions.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result};

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Output of a finished external process.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run an external tool to completion.
///
/// The child is killed when the timeout expires or `cancel` fires. A non-zero
/// exit status is reported as [`Error::Process`] carrying stderr.
pub async fn run_command<I, S>(
    program: &Path,
    args: I,
    limit: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let tool = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!(tool = %tool, "spawning {:?}", command.as_std());

    let run = command.output();
    let output = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        result = async {
            match limit {
                Some(d) => timeout(d, run).await.map_err(|_| Error::Timeout(d))?,
                None => run.await,
            }
            .map_err(Error::from)
        } => result?,
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err(Error::process(
            tool,
            format!("exited with {}: {}", output.status, stderr.trim()),
        ));
    }
    Ok(CommandOutput { stdout, stderr })
}
