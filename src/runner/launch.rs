//! URI and application launcher

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

use super::Runner;
use crate::context::RunContext;
use crate::env::resolve_env;
use crate::error::RunnerError;
use crate::services::Opener;
use crate::types::{expand_env, Directory, EnvMap, Executable};

static URI_SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*:").unwrap());

pub struct LaunchRunner {
    opener: Arc<dyn Opener>,
}

impl LaunchRunner {
    pub fn new(opener: Arc<dyn Opener>) -> Self {
        Self { opener }
    }
}

/// URIs with a scheme only get env substitution; anything else is a path.
fn expand_uri(
    ctx: &RunContext,
    executable: &Executable,
    uri: &str,
    env: &EnvMap,
) -> Result<String, RunnerError> {
    if URI_SCHEME_RE.is_match(uri) {
        return Ok(expand_env(uri, env));
    }
    let path = ctx.resolve_directory(&Directory::new(uri), executable, env)?;
    Ok(path.display().to_string())
}

#[async_trait]
impl Runner for LaunchRunner {
    fn name(&self) -> &'static str {
        "launch"
    }

    fn is_compatible(&self, executable: &Executable) -> bool {
        executable.launch.is_some()
    }

    async fn exec(
        &self,
        ctx: &RunContext,
        executable: &Executable,
        prompted_env: &EnvMap,
    ) -> Result<(), RunnerError> {
        let spec = executable
            .launch
            .as_ref()
            .ok_or_else(|| RunnerError::Validation("executable has no launch spec".to_string()))?;
        if spec.uri.trim().is_empty() {
            return Err(RunnerError::Validation("launch uri must be specified".to_string()));
        }

        let env = resolve_env(ctx, executable, prompted_env)?.env;
        let uri = expand_uri(ctx, executable, &spec.uri, &env)?;
        let app = expand_env(&spec.app, &env);
        debug!(executable = %executable.id(), %uri, %app, wait = spec.wait, "launching");

        if app.is_empty() {
            self.opener.open(&uri, spec.wait).await
        } else {
            self.opener.open_with(&app, &uri, spec.wait).await
        }
    }
}
