//! Shell command execution

use std::io::IsTerminal;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RunnerError;
use crate::types::EnvMap;

/// Run `cmd` with `sh -c` in `dir`, adding `env` to the inherited environment.
pub async fn run_cmd(
    cmd: &str,
    dir: &Path,
    env: &EnvMap,
    cancel: &CancellationToken,
) -> Result<(), RunnerError> {
    let mut command = Command::new("sh");
    command.arg("-c").arg(cmd);
    run(command, dir, env, cancel, "command", detach_group()).await
}

/// Run the script at `dir/file` with `sh`.
pub async fn run_file(
    file: &str,
    dir: &Path,
    env: &EnvMap,
    cancel: &CancellationToken,
) -> Result<(), RunnerError> {
    let path = dir.join(file);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => {
            return Err(RunnerError::Validation(format!(
                "file {} does not exist",
                path.display()
            )))
        }
    }

    let mut command = Command::new("sh");
    command.arg(&path);
    run(command, dir, env, cancel, "script", detach_group()).await
}

async fn run(
    mut command: Command,
    dir: &Path,
    env: &EnvMap,
    cancel: &CancellationToken,
    label: &str,
    own_group: bool,
) -> Result<(), RunnerError> {
    command
        .current_dir(dir)
        .envs(env)
        .stdin(Stdio::inherit())
        .kill_on_drop(true);
    #[cfg(unix)]
    {
        if own_group {
            command.process_group(0);
        }
    }

    debug!(dir = %dir.display(), "starting {}", label);
    let mut child = command
        .spawn()
        .map_err(|e| RunnerError::from(e).wrap(format!("failed to start {}", label)))?;
    let mut group = GroupGuard {
        pgid: child.id().filter(|_| own_group),
    };

    // Returning early, or being dropped on timeout, kills the whole group.
    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => return Err(RunnerError::Cancelled),
    };
    group.disarm();

    if status.success() {
        Ok(())
    } else {
        Err(RunnerError::Execution(format!("{} exited with {}", label, status)))
    }
}

/// Commands attached to a terminal stay in its foreground group so they can
/// read input. The terminal then delivers ctrl-c to all of their processes,
/// but a timeout only stops the shell itself.
fn detach_group() -> bool {
    !std::io::stdin().is_terminal()
}

/// Kills the process group of a command that is abandoned before it exits.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let result = std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("kill -s KILL -- -{}", pgid))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = result {
        warn!(pgid, error = %err, "failed to kill process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}
