//! Shell command and script runner

use async_trait::async_trait;
use tracing::debug;

use super::Runner;
use crate::context::RunContext;
use crate::env::{resolve_env, FLOW_TMP_DIRECTORY};
use crate::error::RunnerError;
use crate::services::shell;
use crate::types::{EnvMap, Executable};

#[derive(Debug, Default)]
pub struct ExecRunner;

impl ExecRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for ExecRunner {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn is_compatible(&self, executable: &Executable) -> bool {
        executable.exec.is_some()
    }

    async fn exec(
        &self,
        ctx: &RunContext,
        executable: &Executable,
        prompted_env: &EnvMap,
    ) -> Result<(), RunnerError> {
        let spec = executable
            .exec
            .as_ref()
            .ok_or_else(|| RunnerError::Validation("executable has no exec spec".to_string()))?;

        match (spec.cmd.is_empty(), spec.file.is_empty()) {
            (false, false) => {
                return Err(RunnerError::Validation(
                    "cannot set both cmd and file".to_string(),
                ))
            }
            (true, true) => {
                return Err(RunnerError::Validation(
                    "either cmd or file must be specified".to_string(),
                ))
            }
            _ => {}
        }

        let mut env = resolve_env(ctx, executable, prompted_env)?.env;
        let dir = ctx.resolve_directory(&spec.dir, executable, &env)?;
        if spec.dir.is_tmp() {
            env.insert(FLOW_TMP_DIRECTORY.to_string(), dir.display().to_string());
        }
        debug!(executable = %executable.id(), dir = %dir.display(), "running exec");

        if spec.file.is_empty() {
            shell::run_cmd(&spec.cmd, &dir, &env, ctx.cancel_token()).await
        } else {
            shell::run_file(&spec.file, &dir, &env, ctx.cancel_token()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ExecutableCache;
    use crate::types::{Directory, ExecSpec, Parameter, Verb};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn create_test_context(ws_path: &std::path::Path) -> RunContext {
        RunContext::new("ws", ws_path, Arc::new(ExecutableCache::default()))
    }

    fn exec_in(ws_path: &std::path::Path, spec: ExecSpec) -> Executable {
        Executable::new(Verb::default(), "app")
            .with_exec(spec)
            .with_context("ws", ws_path, "", ws_path.join("app.flow"))
    }

    #[tokio::test]
    async fn test_runs_cmd_with_resolved_env() {
        let dir = tempdir().unwrap();
        let exec = exec_in(
            dir.path(),
            ExecSpec {
                cmd: "echo \"$GREETING $FLOW_EXECUTABLE_NAME\" > out.txt".into(),
                params: vec![Parameter::text("GREETING", "hello")],
                ..Default::default()
            },
        );

        ExecRunner::new()
            .exec(&create_test_context(dir.path()), &exec, &EnvMap::new())
            .await
            .unwrap();

        let out = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(out.trim(), "hello app");
    }

    #[tokio::test]
    async fn test_runs_script_file() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scripts")).unwrap();
        std::fs::write(dir.path().join("scripts/run.sh"), "pwd > where.txt\n").unwrap();

        let exec = exec_in(
            dir.path(),
            ExecSpec {
                file: "run.sh".into(),
                dir: Directory::new("//scripts"),
                ..Default::default()
            },
        );

        ExecRunner::new()
            .exec(&create_test_context(dir.path()), &exec, &EnvMap::new())
            .await
            .unwrap();
        assert!(dir.path().join("scripts/where.txt").exists());
    }

    #[tokio::test]
    async fn test_cmd_and_file_are_exclusive() {
        let dir = tempdir().unwrap();
        let ctx = create_test_context(dir.path());

        let both = exec_in(
            dir.path(),
            ExecSpec {
                cmd: "true".into(),
                file: "run.sh".into(),
                ..Default::default()
            },
        );
        let err = ExecRunner::new().exec(&ctx, &both, &EnvMap::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "cannot set both cmd and file");

        let neither = exec_in(dir.path(), ExecSpec::default());
        let err = ExecRunner::new().exec(&ctx, &neither, &EnvMap::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "either cmd or file must be specified");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let dir = tempdir().unwrap();
        let exec = exec_in(
            dir.path(),
            ExecSpec {
                cmd: "exit 3".into(),
                ..Default::default()
            },
        );

        let err = ExecRunner::new()
            .exec(&create_test_context(dir.path()), &exec, &EnvMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Execution(_)));
    }

    #[tokio::test]
    async fn test_tmp_dir_is_exported() {
        let dir = tempdir().unwrap();
        let ctx = create_test_context(dir.path());
        let exec = exec_in(
            dir.path(),
            ExecSpec {
                cmd: "touch \"$FLOW_TMP_DIRECTORY/marker\" && touch local".into(),
                dir: Directory::tmp(),
                ..Default::default()
            },
        );

        ExecRunner::new().exec(&ctx, &exec, &EnvMap::new()).await.unwrap();

        let tmp = ctx.tmp_dir().unwrap();
        assert!(tmp.join("marker").exists());
        assert!(tmp.join("local").exists());
        ctx.finalize().unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_process() {
        let dir = tempdir().unwrap();
        let ctx = create_test_context(dir.path());
        let exec = exec_in(
            dir.path(),
            ExecSpec {
                cmd: "sleep 30".into(),
                ..Default::default()
            },
        );

        let token = ctx.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let start = Instant::now();
        let err = ExecRunner::new().exec(&ctx, &exec, &EnvMap::new()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_compatibility() {
        let runner = ExecRunner::new();
        assert!(runner.is_compatible(&Executable::new(Verb::default(), "a").with_exec(ExecSpec::default())));
        assert!(!runner.is_compatible(&Executable::new(Verb::default(), "a")));
    }
}
