//! Opening URIs with the OS handler or a named application

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::RunnerError;

#[async_trait]
pub trait Opener: Send + Sync {
    /// Open `uri` with the default handler.
    async fn open(&self, uri: &str, wait: bool) -> Result<(), RunnerError>;

    /// Open `uri` with `app`.
    async fn open_with(&self, app: &str, uri: &str, wait: bool) -> Result<(), RunnerError>;
}

/// Opens through `open` on macOS, `start` on Windows and `xdg-open` elsewhere.
#[derive(Debug, Clone, Default)]
pub struct SystemOpener;

impl SystemOpener {
    pub fn new() -> Self {
        Self
    }

    fn default_command(uri: &str, wait: bool) -> Command {
        if cfg!(target_os = "macos") {
            let mut cmd = Command::new("open");
            if wait {
                cmd.arg("-W");
            }
            cmd.arg(uri);
            cmd
        } else if cfg!(target_os = "windows") {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "start", ""]);
            if wait {
                cmd.arg("/WAIT");
            }
            cmd.arg(uri);
            cmd
        } else {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(uri);
            cmd
        }
    }

    fn app_command(app: &str, uri: &str, wait: bool) -> Command {
        if cfg!(target_os = "macos") {
            let mut cmd = Command::new("open");
            cmd.arg("-a").arg(app);
            if wait {
                cmd.arg("-W");
            }
            cmd.arg(uri);
            cmd
        } else {
            let mut cmd = Command::new(app);
            cmd.arg(uri);
            cmd
        }
    }

    async fn launch(mut command: Command, wait: bool, target: &str) -> Result<(), RunnerError> {
        debug!(uri = target, wait, "opening");
        if wait {
            let status = command.status().await?;
            if !status.success() {
                return Err(RunnerError::Execution(format!(
                    "unable to open {}: exited with {}",
                    target, status
                )));
            }
        } else {
            command
                .spawn()
                .map_err(|e| RunnerError::from(e).wrap(format!("unable to open {}", target)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Opener for SystemOpener {
    async fn open(&self, uri: &str, wait: bool) -> Result<(), RunnerError> {
        Self::launch(Self::default_command(uri, wait), wait, uri).await
    }

    async fn open_with(&self, app: &str, uri: &str, wait: bool) -> Result<(), RunnerError> {
        Self::launch(Self::app_command(app, uri, wait), wait, uri).await
    }
}
