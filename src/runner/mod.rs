//! Runner registry and dispatch
//!
//! Each runner handles one executable type. The registry picks the first
//! registered runner that is compatible with an executable and enforces the
//! executable's timeout around it.

mod composite;
pub mod exec;
pub mod launch;
pub mod parallel;
pub mod render;
pub mod request;
pub mod serial;

use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::engine::{Engine, ExecEngine};
use crate::error::RunnerError;
use crate::services::{ExprEvaluator, HttpRestClient, JinjaEvaluator, Opener, RestClient, SystemOpener};
use crate::types::{EnvMap, Executable};

pub use exec::ExecRunner;
pub use launch::LaunchRunner;
pub use parallel::ParallelRunner;
pub use render::RenderRunner;
pub use request::RequestRunner;
pub use serial::SerialRunner;

#[async_trait]
pub trait Runner: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_compatible(&self, executable: &Executable) -> bool;

    async fn exec(
        &self,
        ctx: &RunContext,
        executable: &Executable,
        prompted_env: &EnvMap,
    ) -> Result<(), RunnerError>;
}

/// Runs an executable with whichever runner handles it.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn run(
        &self,
        ctx: &RunContext,
        executable: &Executable,
        prompted_env: &EnvMap,
    ) -> Result<(), RunnerError>;
}

/// Collaborators handed to the built-in runners.
#[derive(Clone)]
pub struct Services {
    pub opener: Arc<dyn Opener>,
    pub rest: Arc<dyn RestClient>,
    pub expr: Arc<dyn ExprEvaluator>,
    pub engine: Arc<dyn Engine>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            opener: Arc::new(SystemOpener::new()),
            rest: Arc::new(HttpRestClient::new()),
            expr: Arc::new(JinjaEvaluator::new()),
            engine: Arc::new(ExecEngine::new()),
        }
    }
}

impl Services {
    pub fn with_opener(mut self, opener: Arc<dyn Opener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn with_rest(mut self, rest: Arc<dyn RestClient>) -> Self {
        self.rest = rest;
        self
    }

    pub fn with_expr(mut self, expr: Arc<dyn ExprEvaluator>) -> Self {
        self.expr = expr;
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = engine;
        self
    }
}

/// Ordered set of runners.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: RwLock<Vec<Arc<dyn Runner>>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in runner. Serial and parallel runners
    /// dispatch their children back through it.
    pub fn with_builtin_runners(services: Services) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<RunnerRegistry>| {
            let dispatcher: Weak<dyn Dispatcher> = weak.clone();
            let registry = RunnerRegistry::new();
            registry.register(Arc::new(ExecRunner::new()));
            registry.register(Arc::new(LaunchRunner::new(services.opener.clone())));
            registry.register(Arc::new(RequestRunner::new(
                services.rest.clone(),
                services.expr.clone(),
            )));
            registry.register(Arc::new(RenderRunner::new()));
            registry.register(Arc::new(SerialRunner::new(
                dispatcher.clone(),
                services.engine.clone(),
                services.expr.clone(),
            )));
            registry.register(Arc::new(ParallelRunner::new(
                dispatcher,
                services.engine.clone(),
                services.expr.clone(),
            )));
            registry
        })
    }

    pub fn register(&self, runner: Arc<dyn Runner>) {
        self.runners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(runner);
    }

    pub fn reset(&self) {
        self.runners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn runner_names(&self) -> Vec<&'static str> {
        self.runners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.name())
            .collect()
    }

    fn find(&self, executable: &Executable) -> Option<Arc<dyn Runner>> {
        self.runners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.is_compatible(executable))
            .cloned()
    }
}

#[async_trait]
impl Dispatcher for RunnerRegistry {
    async fn run(
        &self,
        ctx: &RunContext,
        executable: &Executable,
        prompted_env: &EnvMap,
    ) -> Result<(), RunnerError> {
        let runner = self
            .find(executable)
            .ok_or_else(|| RunnerError::NoCompatibleRunner(executable.id()))?;
        debug!(runner = runner.name(), executable = %executable.id(), "dispatching");

        let Some(timeout) = executable.timeout.filter(|t| !t.is_zero()) else {
            return runner.exec(ctx, executable, prompted_env).await;
        };

        // The runner gets its own token so work it started can be stopped on timeout.
        let token = ctx.cancel_token().child_token();
        let scoped = ctx.clone().with_cancel(token.clone());
        match tokio::time::timeout(timeout, runner.exec(&scoped, executable, prompted_env)).await {
            Ok(result) => result,
            Err(_) => {
                token.cancel();
                warn!(executable = %executable.id(), ?timeout, "execution timed out");
                Err(RunnerError::Timeout(timeout))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Test doubles shared by the runner tests.

    use super::*;
    use std::sync::Mutex;

    /// Records every executable it runs along with the env it was given.
    pub struct RecordingRunner {
        pub name: &'static str,
        pub calls: Mutex<Vec<(String, EnvMap)>>,
        pub fail_names: Vec<String>,
    }

    impl RecordingRunner {
        pub fn new(name: &'static str) -> Self {
            Self {
                name,
                calls: Mutex::new(Vec::new()),
                fail_names: Vec::new(),
            }
        }

        pub fn failing_on(mut self, names: &[&str]) -> Self {
            self.fail_names = names.iter().map(|n| n.to_string()).collect();
            self
        }

        pub fn called(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
        }

        pub fn env_of(&self, name: &str) -> Option<EnvMap> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, env)| env.clone())
        }
    }

    #[async_trait]
    impl Runner for RecordingRunner {
        fn name(&self) -> &'static str {
            self.name
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
            let env = crate::env::resolve_env(ctx, executable, prompted_env)?.env;
            self.calls
                .lock()
                .unwrap()
                .push((executable.name.clone(), env));
            if self.fail_names.contains(&executable.name) {
                Err(RunnerError::Execution(format!("{} failed", executable.name)))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingRunner;
    use super::*;
    use crate::cache::ExecutableCache;
    use crate::types::{ExecSpec, LaunchSpec, Verb};
    use std::time::{Duration, Instant};

    struct SlowRunner;

    #[async_trait]
    impl Runner for SlowRunner {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn is_compatible(&self, _executable: &Executable) -> bool {
            true
        }

        async fn exec(
            &self,
            ctx: &RunContext,
            _executable: &Executable,
            _prompted_env: &EnvMap,
        ) -> Result<(), RunnerError> {
            tokio::select! {
                _ = ctx.cancel_token().cancelled() => Err(RunnerError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(()),
            }
        }
    }

    fn create_test_context() -> RunContext {
        RunContext::new("ws", "/ws", Arc::new(ExecutableCache::default()))
    }

    fn exec_executable(name: &str) -> Executable {
        Executable::new(Verb::default(), name)
            .with_exec(ExecSpec {
                cmd: "true".into(),
                ..Default::default()
            })
            .with_context("ws", "/ws", "", "/ws/a.flow")
    }

    #[tokio::test]
    async fn test_no_compatible_runner() {
        let registry = RunnerRegistry::new();
        registry.register(Arc::new(RecordingRunner::new("recording")));

        let launch = Executable::new(Verb::new("open"), "docs")
            .with_launch(LaunchSpec {
                uri: "https://example.com".into(),
                ..Default::default()
            })
            .with_context("ws", "/ws", "", "/ws/a.flow");

        let err = registry
            .run(&create_test_context(), &launch, &EnvMap::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "compatible runner not found for executable ws/docs"
        );
    }

    #[tokio::test]
    async fn test_first_compatible_runner_wins() {
        let registry = RunnerRegistry::new();
        let first = Arc::new(RecordingRunner::new("first"));
        let second = Arc::new(RecordingRunner::new("second"));
        registry.register(first.clone());
        registry.register(second.clone());

        registry
            .run(&create_test_context(), &exec_executable("app"), &EnvMap::new())
            .await
            .unwrap();

        assert_eq!(first.called(), vec!["app"]);
        assert!(second.called().is_empty());
        assert_eq!(registry.runner_names(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_reset_clears_runners() {
        let registry = RunnerRegistry::new();
        registry.register(Arc::new(RecordingRunner::new("recording")));
        registry.reset();

        let err = registry
            .run(&create_test_context(), &exec_executable("app"), &EnvMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::NoCompatibleRunner(_)));
    }

    #[tokio::test]
    async fn test_timeout_returns_promptly() {
        let registry = RunnerRegistry::new();
        registry.register(Arc::new(SlowRunner));

        let executable = exec_executable("slow").with_timeout(Duration::from_millis(50));
        let ctx = create_test_context();

        let start = Instant::now();
        let err = registry.run(&ctx, &executable, &EnvMap::new()).await.unwrap_err();

        assert!(matches!(err, RunnerError::Timeout(t) if t == Duration::from_millis(50)));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!ctx.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_fast_runner_beats_timeout() {
        let registry = RunnerRegistry::new();
        let recording = Arc::new(RecordingRunner::new("recording"));
        registry.register(recording.clone());

        let executable = exec_executable("fast").with_timeout(Duration::from_secs(5));
        registry
            .run(&create_test_context(), &executable, &EnvMap::new())
            .await
            .unwrap();
        assert_eq!(recording.called(), vec!["fast"]);
    }

    #[test]
    fn test_builtin_runner_order() {
        let registry = RunnerRegistry::with_builtin_runners(Services::default());
        assert_eq!(
            registry.runner_names(),
            vec!["exec", "launch", "request", "render", "serial", "parallel"]
        );
    }
}
