//! Execution engine
//!
//! Runs a batch of operations either one after another or concurrently with a
//! bound on the number in flight. Every operation gets its own retry handler,
//! and results are reported in input order.

pub mod retry;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ExecFailure, ExecFailures, RunnerError};

pub use retry::{RetryHandler, Stats};

pub type ExecFuture = BoxFuture<'static, Result<(), RunnerError>>;
pub type ExecFn = Arc<dyn Fn(CancellationToken) -> ExecFuture + Send + Sync>;

/// A named, re-invocable operation submitted to the engine.
#[derive(Clone)]
pub struct Exec {
    pub id: String,
    pub function: ExecFn,
    pub max_retries: u32,
}

impl Exec {
    pub fn new<F, Fut>(id: impl Into<String>, function: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RunnerError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            function: Arc::new(move |token| function(token).boxed()),
            max_retries: 0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn call(&self, token: CancellationToken) -> ExecFuture {
        (self.function)(token)
    }
}

impl fmt::Debug for Exec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exec")
            .field("id", &self.id)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Outcome of one operation.
#[derive(Debug)]
pub struct ExecResult {
    pub id: String,
    pub error: Option<RunnerError>,
    /// Attempts beyond the first
    pub retries: u32,
    /// Never started, or stopped by cancellation of its group
    pub cancelled: bool,
}

impl ExecResult {
    fn not_started(id: &str) -> Self {
        Self {
            id: id.to_string(),
            error: None,
            retries: 0,
            cancelled: true,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct ResultSummary {
    pub results: Vec<ExecResult>,
}

impl ResultSummary {
    pub fn has_errors(&self) -> bool {
        self.results.iter().any(|r| r.error.is_some())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExecResult> {
        self.results.iter().filter(|r| r.error.is_some())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Collapse the summary into one error listing every failure.
    pub fn into_result(self) -> Result<(), RunnerError> {
        let failures: Vec<ExecFailure> = self
            .results
            .into_iter()
            .filter_map(|r| {
                r.error.map(|error| ExecFailure {
                    id: r.id,
                    error,
                    retries: r.retries,
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RunnerError::Aggregate(ExecFailures(failures)))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    #[default]
    Serial,
    Parallel,
}

/// Engine options. Unset `fail_fast` means fail fast.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub max_threads: usize,
    pub mode: ExecutionMode,
    pub fail_fast: Option<bool>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = Some(fail_fast);
        self
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast.unwrap_or(true)
    }
}

#[async_trait]
pub trait Engine: Send + Sync {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        execs: Vec<Exec>,
        options: Options,
    ) -> ResultSummary;
}

/// Default engine backed by tokio tasks.
#[derive(Debug, Clone, Default)]
pub struct ExecEngine;

impl ExecEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Engine for ExecEngine {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        execs: Vec<Exec>,
        options: Options,
    ) -> ResultSummary {
        let fail_fast = options.fail_fast();
        debug!(
            count = execs.len(),
            mode = ?options.mode,
            fail_fast,
            max_threads = options.max_threads,
            "executing batch"
        );

        let results = match options.mode {
            ExecutionMode::Serial => execute_serial(cancel, execs, fail_fast).await,
            ExecutionMode::Parallel => {
                execute_parallel(cancel, execs, options.max_threads, fail_fast).await
            }
        };
        ResultSummary { results }
    }
}

async fn execute_serial(
    cancel: &CancellationToken,
    execs: Vec<Exec>,
    fail_fast: bool,
) -> Vec<ExecResult> {
    let mut results = Vec::with_capacity(execs.len());

    for exec in execs {
        if cancel.is_cancelled() {
            results.push(ExecResult {
                id: exec.id,
                error: Some(RunnerError::Cancelled),
                retries: 0,
                cancelled: true,
            });
            return results;
        }

        let mut handler = RetryHandler::new(exec.max_retries, Duration::ZERO);
        let outcome = handler.execute(|| exec.call(cancel.clone())).await;
        let failed = outcome.is_err();

        results.push(ExecResult {
            id: exec.id,
            error: outcome.err(),
            retries: handler.stats().attempts.saturating_sub(1),
            cancelled: false,
        });

        if failed && fail_fast {
            break;
        }
    }

    results
}

async fn execute_parallel(
    cancel: &CancellationToken,
    execs: Vec<Exec>,
    max_threads: usize,
    fail_fast: bool,
) -> Vec<ExecResult> {
    if execs.is_empty() {
        return Vec::new();
    }

    let limit = if max_threads > 0 { max_threads } else { execs.len() };
    let semaphore = Arc::new(Semaphore::new(limit));
    let group = cancel.child_token();
    let mut slots: Vec<ExecResult> = execs.iter().map(|e| ExecResult::not_started(&e.id)).collect();
    let mut join_set = JoinSet::new();

    for (index, exec) in execs.into_iter().enumerate() {
        let sem = semaphore.clone();
        let group = group.clone();

        join_set.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = group.cancelled() => return (index, None),
                permit = sem.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return (index, None),
                },
            };
            if group.is_cancelled() {
                return (index, None);
            }

            let mut handler = RetryHandler::new(exec.max_retries, Duration::ZERO);
            let outcome = AssertUnwindSafe(handler.execute(|| exec.call(group.clone())))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(RunnerError::Panicked(panic_message(panic))));
            let retries = handler.stats().attempts.saturating_sub(1);

            let result = match outcome {
                Ok(()) => ExecResult {
                    id: exec.id,
                    error: None,
                    retries,
                    cancelled: false,
                },
                Err(err) if err.is_cancelled() && group.is_cancelled() => ExecResult {
                    id: exec.id,
                    error: None,
                    retries,
                    cancelled: true,
                },
                Err(err) => {
                    if fail_fast {
                        group.cancel();
                    }
                    ExecResult {
                        id: exec.id,
                        error: Some(err),
                        retries,
                        cancelled: false,
                    }
                }
            };
            (index, Some(result))
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, Some(result))) => slots[index] = result,
            Ok((_, None)) => {}
            Err(err) => warn!(error = %err, "parallel execution task failed"),
        }
    }

    // Work stopped by the caller's token is an error, unlike a fail-fast stop.
    if cancel.is_cancelled() {
        for slot in slots.iter_mut().filter(|s| s.cancelled && s.error.is_none()) {
            slot.error = Some(RunnerError::Cancelled);
        }
    }

    slots
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
