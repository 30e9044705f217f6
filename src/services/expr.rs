//! Expression evaluation for step conditions and response transforms

use minijinja::{Environment, Value};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::RunnerError;
use crate::types::{EnvMap, Executable};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionContext {
    pub workspace: String,
    pub namespace: String,
    pub workspace_path: String,
    pub flow_file_path: String,
    pub flow_file_dir: String,
}

/// Values visible to an expression: `os`, `arch`, `ctx`, `env`, plus extras.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpressionData {
    pub os: String,
    pub arch: String,
    pub ctx: ExpressionContext,
    pub env: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ExpressionData {
    pub fn new(executable: &Executable, env: &EnvMap) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            ctx: ExpressionContext {
                workspace: executable.workspace.clone(),
                namespace: executable.namespace.clone(),
                workspace_path: executable.workspace_path.display().to_string(),
                flow_file_path: executable.flowfile_path.display().to_string(),
                flow_file_dir: executable.flowfile_dir().display().to_string(),
            },
            env: env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

pub trait ExprEvaluator: Send + Sync {
    /// Evaluate `expression` and render the result as a string.
    fn evaluate_string(&self, expression: &str, data: &ExpressionData) -> Result<String, RunnerError>;

    fn is_truthy(&self, expression: &str, data: &ExpressionData) -> Result<bool, RunnerError>;
}

/// Evaluates Jinja expressions such as `env.CI == "true" and os == "linux"`.
#[derive(Debug, Default)]
pub struct JinjaEvaluator {
    env: Environment<'static>,
}

impl JinjaEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn evaluate(&self, expression: &str, data: &ExpressionData) -> Result<Value, RunnerError> {
        let wrap = |e: minijinja::Error| RunnerError::Expression(format!("{}: {}", expression, e));
        let compiled = self.env.compile_expression(expression).map_err(wrap)?;
        compiled.eval(data).map_err(wrap)
    }
}

impl ExprEvaluator for JinjaEvaluator {
    fn evaluate_string(&self, expression: &str, data: &ExpressionData) -> Result<String, RunnerError> {
        let value = self.evaluate(expression, data)?;
        if value.is_undefined() || value.is_none() {
            return Ok(String::new());
        }
        Ok(match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        })
    }

    fn is_truthy(&self, expression: &str, data: &ExpressionData) -> Result<bool, RunnerError> {
        Ok(self.evaluate(expression, data)?.is_true())
    }
}
