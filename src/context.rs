//! Per-run state shared by the dispatcher and runners

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::ExecutableLookup;
use crate::error::{ResultExt, RunnerError};
use crate::services::{EnvVault, InteractiveView, Vault};
use crate::types::{Directory, EnvMap, Executable, Ref};

/// Workspace, collaborators and cancellation for one run tree.
///
/// Clones share the temp directory, so every executable of a run that asks for
/// `f:tmp` gets the same one.
#[derive(Clone)]
pub struct RunContext {
    pub workspace: String,
    pub workspace_path: PathBuf,
    pub namespace: String,
    pub run_id: String,
    /// Command line arguments for the root executable
    pub args: Vec<String>,
    cancel: CancellationToken,
    inherited_env: Arc<EnvMap>,
    tmp_dir: Arc<Mutex<Option<PathBuf>>>,
    lookup: Arc<dyn ExecutableLookup>,
    vault: Arc<dyn Vault>,
    view: Option<Arc<dyn InteractiveView>>,
}

impl RunContext {
    pub fn new(
        workspace: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
        lookup: Arc<dyn ExecutableLookup>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            workspace_path: workspace_path.into(),
            namespace: String::new(),
            run_id: Uuid::new_v4().to_string(),
            args: Vec::new(),
            cancel: CancellationToken::new(),
            inherited_env: Arc::new(EnvMap::new()),
            tmp_dir: Arc::new(Mutex::new(None)),
            lookup,
            vault: Arc::new(EnvVault::new()),
            view: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_vault(mut self, vault: Arc<dyn Vault>) -> Self {
        self.vault = vault;
        self
    }

    pub fn with_view(mut self, view: Arc<dyn InteractiveView>) -> Self {
        self.view = Some(view);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Context for the children of a composite: no command line arguments,
    /// and `env` layered under the children's own parameters.
    pub fn child(&self, env: EnvMap) -> Self {
        let mut inherited = (*self.inherited_env).clone();
        inherited.extend(env);
        Self {
            args: Vec::new(),
            inherited_env: Arc::new(inherited),
            ..self.clone()
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn inherited_env(&self) -> &EnvMap {
        &self.inherited_env
    }

    pub fn lookup(&self) -> &dyn ExecutableLookup {
        self.lookup.as_ref()
    }

    pub fn vault(&self) -> &dyn Vault {
        self.vault.as_ref()
    }

    pub fn view(&self) -> Option<&Arc<dyn InteractiveView>> {
        self.view.as_ref()
    }

    pub fn is_interactive(&self) -> bool {
        self.view.as_ref().is_some_and(|v| v.is_active())
    }

    /// Fill in an unset workspace and namespace with the current ones.
    pub fn expand_ref(&self, reference: &Ref) -> Ref {
        let mut expanded = reference.clone();
        if expanded.workspace.is_none() && !self.workspace.is_empty() {
            expanded.workspace = Some(self.workspace.clone());
        }
        if expanded.namespace.is_none() && !self.namespace.is_empty() {
            expanded.namespace = Some(self.namespace.clone());
        }
        expanded
    }

    /// The run's temp directory, if one was created.
    pub fn tmp_dir(&self) -> Option<PathBuf> {
        self.tmp_dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The run's temp directory, created on first use.
    pub fn process_tmp_dir(&self) -> Result<PathBuf, RunnerError> {
        let mut guard = self.tmp_dir.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(dir) = guard.as_ref() {
            return Ok(dir.clone());
        }

        let dir = std::env::temp_dir().join(format!("flow-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create temp directory {}", dir.display()))?;
        debug!(dir = %dir.display(), "created temp directory");
        *guard = Some(dir.clone());
        Ok(dir)
    }

    /// Resolve `dir` for `executable`, creating the temp directory for `f:tmp`.
    pub fn resolve_directory(
        &self,
        dir: &Directory,
        executable: &Executable,
        env: &EnvMap,
    ) -> Result<PathBuf, RunnerError> {
        if dir.is_tmp() {
            return self.process_tmp_dir();
        }
        Ok(dir.expand(self.workspace_root(executable), &executable.flowfile_path, env))
    }

    fn workspace_root<'a>(&'a self, executable: &'a Executable) -> &'a Path {
        if executable.workspace_path.as_os_str().is_empty() {
            &self.workspace_path
        } else {
            &executable.workspace_path
        }
    }

    /// Remove the temp directory, if any.
    pub fn finalize(&self) -> Result<(), RunnerError> {
        let dir = self
            .tmp_dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dir) = dir {
            debug!(dir = %dir.display(), "removing temp directory");
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to remove temp directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Remove the temp directory and hand back `result`. Cleanup failures are
    /// logged and never replace the run's own outcome.
    pub fn finish<T>(&self, result: Result<T, RunnerError>) -> Result<T, RunnerError> {
        if let Err(err) = self.finalize() {
            warn!(error = %err, "temp directory cleanup failed");
        }
        result
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("workspace", &self.workspace)
            .field("workspace_path", &self.workspace_path)
            .field("namespace", &self.namespace)
            .field("run_id", &self.run_id)
            .field("args", &self.args)
            .field("tmp_dir", &self.tmp_dir())
            .finish_non_exhaustive()
    }
}
