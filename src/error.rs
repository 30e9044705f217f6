//! Error types shared by the dispatcher, runners and the execution engine

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = RunnerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("executable not found: {0}")]
    NotFound(String),

    #[error("compatible runner not found for executable {0}")]
    NoCompatibleRunner(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Every parameter that could not be resolved, in declaration order
    #[error("failed to get values for parameters: {}", .0.join("; "))]
    Parameters(Vec<String>),

    #[error("invalid arguments: {}", .0.join("; "))]
    Arguments(Vec<String>),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Execution(String),

    #[error("execution cancelled")]
    Cancelled,

    #[error("execution failed after {attempts} attempts. Last error: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<RunnerError>,
    },

    #[error("{0}")]
    Aggregate(ExecFailures),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status code {status}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("expression error: {0}")]
    Expression(String),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("secret error: {0}")]
    Secret(String),

    #[error("unable to render when interactive mode is disabled")]
    NotInteractive,

    #[error("{0}")]
    Stopped(String),

    #[error("execution panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<RunnerError>,
    },
}

impl RunnerError {
    /// Attach a message describing what was being done when the error occurred.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        RunnerError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RunnerError::NotFound(_)
            | RunnerError::NoCompatibleRunner(_)
            | RunnerError::Parameters(_)
            | RunnerError::Arguments(_)
            | RunnerError::Validation(_)
            | RunnerError::Cancelled
            | RunnerError::NotInteractive
            | RunnerError::Stopped(_) => false,
            RunnerError::Context { source, .. } => source.is_retryable(),
            RunnerError::Aggregate(_) => !self.is_cancelled(),
            _ => true,
        }
    }

    /// Whether the error only reports cancellation. A nested composite that
    /// was stopped counts when every one of its failures is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            RunnerError::Cancelled => true,
            RunnerError::Context { source, .. } | RunnerError::RetriesExhausted { source, .. } => {
                source.is_cancelled()
            }
            RunnerError::Aggregate(failures) => {
                !failures.is_empty() && failures.iter().all(|f| f.error.is_cancelled())
            }
            _ => false,
        }
    }
}

/// A failed entry of an execution summary.
#[derive(Debug)]
pub struct ExecFailure {
    pub id: String,
    pub error: RunnerError,
    pub retries: u32,
}

/// Failures collected from a composite run, rendered as one report.
#[derive(Debug, Default)]
pub struct ExecFailures(pub Vec<ExecFailure>);

impl ExecFailures {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecFailure> {
        self.0.iter()
    }
}

impl fmt::Display for ExecFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} execution error(s) encountered", self.0.len())?;
        for failure in &self.0 {
            write!(f, "\n- Executable: {}\n  Error: {}", failure.id, failure.error)?;
            if failure.retries > 0 {
                write!(f, "\n  Retries: {}", failure.retries)?;
            }
        }
        Ok(())
    }
}

pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: Into<RunnerError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().wrap(context))
    }

    fn with_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| e.into().wrap(f()))
    }
}
