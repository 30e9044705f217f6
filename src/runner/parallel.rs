//! Runs child executables concurrently

use async_trait::async_trait;
use std::sync::{Arc, Weak};

use super::composite::{self, Composite};
use super::{Dispatcher, Runner};
use crate::context::RunContext;
use crate::engine::{Engine, ExecutionMode, Options};
use crate::error::RunnerError;
use crate::services::ExprEvaluator;
use crate::types::{EnvMap, Executable};

pub struct ParallelRunner {
    dispatcher: Weak<dyn Dispatcher>,
    engine: Arc<dyn Engine>,
    expr: Arc<dyn ExprEvaluator>,
}

impl ParallelRunner {
    pub fn new(
        dispatcher: Weak<dyn Dispatcher>,
        engine: Arc<dyn Engine>,
        expr: Arc<dyn ExprEvaluator>,
    ) -> Self {
        Self {
            dispatcher,
            engine,
            expr,
        }
    }
}

#[async_trait]
impl Runner for ParallelRunner {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn is_compatible(&self, executable: &Executable) -> bool {
        executable.parallel.is_some()
    }

    async fn exec(
        &self,
        ctx: &RunContext,
        executable: &Executable,
        prompted_env: &EnvMap,
    ) -> Result<(), RunnerError> {
        let spec = executable
            .parallel
            .as_ref()
            .ok_or_else(|| RunnerError::Validation("executable has no parallel spec".to_string()))?;

        let mut options = Options::new()
            .with_mode(ExecutionMode::Parallel)
            .with_max_threads(spec.max_threads);
        if let Some(fail_fast) = spec.fail_fast {
            options = options.with_fail_fast(fail_fast);
        }

        composite::run(
            &self.dispatcher,
            self.engine.as_ref(),
            self.expr.as_ref(),
            ctx,
            executable,
            prompted_env,
            Composite {
                execs: &spec.execs,
                dir: &spec.dir,
                options,
            },
        )
        .await
    }
}
