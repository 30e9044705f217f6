//! Runs child executables one after another

use async_trait::async_trait;
use std::sync::{Arc, Weak};

use super::composite::{self, Composite};
use super::{Dispatcher, Runner};
use crate::context::RunContext;
use crate::engine::{Engine, ExecutionMode, Options};
use crate::error::RunnerError;
use crate::services::ExprEvaluator;
use crate::types::{EnvMap, Executable};

pub struct SerialRunner {
    dispatcher: Weak<dyn Dispatcher>,
    engine: Arc<dyn Engine>,
    expr: Arc<dyn ExprEvaluator>,
}

impl SerialRunner {
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
impl Runner for SerialRunner {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn is_compatible(&self, executable: &Executable) -> bool {
        executable.serial.is_some()
    }

    async fn exec(
        &self,
        ctx: &RunContext,
        executable: &Executable,
        prompted_env: &EnvMap,
    ) -> Result<(), RunnerError> {
        let spec = executable
            .serial
            .as_ref()
            .ok_or_else(|| RunnerError::Validation("executable has no serial spec".to_string()))?;

        let mut options = Options::new().with_mode(ExecutionMode::Serial);
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
