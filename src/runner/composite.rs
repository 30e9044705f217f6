//! Shared child handling for serial and parallel executables

use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

use super::Dispatcher;
use crate::context::RunContext;
use crate::engine::{Engine, Exec, ExecutionMode, Options};
use crate::env::{resolve_arguments, resolve_env};
use crate::error::RunnerError;
use crate::services::{ExprEvaluator, ExpressionData};
use crate::types::{ChildExec, Directory, EnvMap, Executable};

/// A resolved step, ready to submit.
struct ChildPlan {
    executable: Arc<Executable>,
    prompted_env: EnvMap,
    retries: u32,
    review_required: bool,
}

pub(crate) struct Composite<'a> {
    pub execs: &'a [ChildExec],
    pub dir: &'a Directory,
    pub options: Options,
}

impl Composite<'_> {
    fn kind(&self) -> &'static str {
        match self.options.mode {
            ExecutionMode::Serial => "serial",
            ExecutionMode::Parallel => "parallel",
        }
    }
}

/// Resolve the children of `parent`, run them through the engine and fold
/// the outcome into a single result.
pub(crate) async fn run(
    dispatcher: &Weak<dyn Dispatcher>,
    engine: &dyn Engine,
    expr: &dyn ExprEvaluator,
    ctx: &RunContext,
    parent: &Executable,
    prompted_env: &EnvMap,
    composite: Composite<'_>,
) -> Result<(), RunnerError> {
    let kind = composite.kind();
    if composite.execs.is_empty() {
        return Err(RunnerError::Validation(format!("no {} executables to run", kind)));
    }

    let resolved = resolve_env(ctx, parent, prompted_env)?;
    let plans = plan_children(ctx, parent, &composite, &resolved.env, prompted_env, expr)?;
    if plans.is_empty() {
        debug!(executable = %parent.id(), "every {} step was skipped", kind);
        return Ok(());
    }

    let dispatcher = dispatcher.upgrade().ok_or_else(|| {
        RunnerError::Execution("runner registry is no longer available".to_string())
    })?;
    let child_ctx = ctx.child(resolved.declared);
    let review_enabled = composite.options.mode == ExecutionMode::Serial;
    let total = plans.len();

    let execs: Vec<Exec> = plans
        .into_iter()
        .enumerate()
        .map(|(index, plan)| {
            let review = review_enabled && plan.review_required && index + 1 < total;
            child_exec(dispatcher.clone(), child_ctx.clone(), plan, review, index, total)
        })
        .collect();

    let log_failures = !composite.options.fail_fast() && !review_enabled;
    let summary = engine
        .execute(ctx.cancel_token(), execs, composite.options)
        .await;

    if log_failures {
        for failure in summary.failures() {
            if let Some(err) = &failure.error {
                error!(executable = %failure.id, error = %err, "parallel step failed");
            }
        }
    }

    summary.into_result()
}

fn plan_children(
    ctx: &RunContext,
    parent: &Executable,
    composite: &Composite<'_>,
    env: &EnvMap,
    prompted_env: &EnvMap,
    expr: &dyn ExprEvaluator,
) -> Result<Vec<ChildPlan>, RunnerError> {
    let kind = composite.kind();
    let data = ExpressionData::new(parent, env);
    let mut plans = Vec::with_capacity(composite.execs.len());

    for (index, child) in composite.execs.iter().enumerate() {
        if !child.condition.is_empty() {
            let run = expr
                .is_truthy(&child.condition, &data)
                .map_err(|e| e.wrap(format!("{} step {} condition", kind, index + 1)))?;
            if !run {
                debug!(step = index + 1, condition = %child.condition, "skipping step");
                continue;
            }
        }

        let mut executable = match (&child.reference, child.cmd.is_empty()) {
            (Some(reference), true) => {
                let found = ctx.lookup().get_executable_by_ref(&ctx.expand_ref(reference))?;
                (*found).clone()
            }
            (None, false) => Executable::for_cmd(parent, &child.cmd, index + 1),
            _ => {
                return Err(RunnerError::Validation(format!(
                    "{} executable must have a ref or cmd",
                    kind
                )))
            }
        };
        executable.inherit_dir(composite.dir);

        let mut child_prompted = prompted_env.clone();
        if !child.args.is_empty() {
            let args = resolve_arguments(executable.arguments(), &child.args, prompted_env, env)
                .map_err(|e| e.wrap(format!("{} step {}", kind, index + 1)))?;
            child_prompted.extend(args);
        }

        plans.push(ChildPlan {
            executable: Arc::new(executable),
            prompted_env: child_prompted,
            retries: child.retries,
            review_required: child.review_required,
        });
    }

    Ok(plans)
}

fn child_exec(
    dispatcher: Arc<dyn Dispatcher>,
    ctx: RunContext,
    plan: ChildPlan,
    review: bool,
    index: usize,
    total: usize,
) -> Exec {
    let id = plan.executable.reference().to_string();
    let executable = plan.executable;
    let prompted_env = Arc::new(plan.prompted_env);

    Exec::new(id, move |token| {
        let dispatcher = dispatcher.clone();
        let ctx = ctx.clone().with_cancel(token);
        let executable = executable.clone();
        let prompted_env = prompted_env.clone();
        async move {
            dispatcher.run(&ctx, &executable, &prompted_env).await?;
            if review {
                confirm_next(&ctx, index, total).await?;
            }
            Ok(())
        }
    })
    .with_max_retries(plan.retries)
}

async fn confirm_next(ctx: &RunContext, index: usize, total: usize) -> Result<(), RunnerError> {
    let Some(view) = ctx.view().filter(|v| v.is_active()) else {
        warn!("review requested but interactive mode is disabled, continuing");
        return Ok(());
    };
    if view
        .confirm("Do you want to proceed with the next execution?")
        .await?
    {
        Ok(())
    } else {
        Err(RunnerError::Stopped(format!(
            "stopping runner early ({}/{} executables completed)",
            index + 1,
            total
        )))
    }
}
