//! Executable discovery and lookup
//!
//! Flow files are YAML documents named `*.flow` anywhere under the workspace:
//!
//! ```yaml
//! namespace: tools
//! tags: [ci]
//! executables:
//!   - verb: build
//!     name: app
//!     exec:
//!       cmd: cargo build
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::RunnerError;
use crate::types::{Executable, Ref};

pub const FLOW_FILE_PATTERN: &str = "**/*.flow";

/// Resolves references to executables.
pub trait ExecutableLookup: Send + Sync {
    fn get_executable_by_ref(&self, reference: &Ref) -> Result<Arc<Executable>, RunnerError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowFile {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub executables: Vec<Executable>,
}

/// In-memory set of executables loaded from a workspace.
#[derive(Debug, Default)]
pub struct ExecutableCache {
    executables: Vec<Arc<Executable>>,
}

impl ExecutableCache {
    pub fn new(executables: Vec<Executable>) -> Self {
        Self {
            executables: executables.into_iter().map(Arc::new).collect(),
        }
    }

    /// Load and validate every flow file under `workspace_path`.
    pub fn load(
        workspace: &str,
        workspace_path: &Path,
        default_timeout: Option<Duration>,
    ) -> Result<Self> {
        let pattern = workspace_path.join(FLOW_FILE_PATTERN);
        let pattern = pattern.to_string_lossy();

        let mut paths: Vec<PathBuf> = glob::glob(&pattern)
            .with_context(|| format!("Invalid flow file pattern: {}", pattern))?
            .filter_map(|entry| entry.ok())
            .collect();
        paths.sort();

        let mut executables = Vec::new();
        for path in paths {
            let flow_file = Self::read_flow_file(&path)?;
            debug!(
                path = %path.display(),
                count = flow_file.executables.len(),
                "loaded flow file"
            );

            for mut exec in flow_file.executables {
                exec.tags.extend(flow_file.tags.iter().cloned());
                if exec.timeout.is_none() {
                    exec.timeout = default_timeout;
                }
                let exec = exec.with_context(
                    workspace,
                    workspace_path,
                    flow_file.namespace.as_str(),
                    path.as_path(),
                );
                exec.validate()
                    .with_context(|| format!("Invalid executable in {}", path.display()))?;
                executables.push(Arc::new(exec));
            }
        }

        Ok(Self { executables })
    }

    fn read_flow_file(path: &Path) -> Result<FlowFile> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read flow file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse flow file: {}", path.display()))
    }

    pub fn executables(&self) -> &[Arc<Executable>] {
        &self.executables
    }

    pub fn len(&self) -> usize {
        self.executables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executables.is_empty()
    }
}

impl ExecutableLookup for ExecutableCache {
    fn get_executable_by_ref(&self, reference: &Ref) -> Result<Arc<Executable>, RunnerError> {
        self.executables
            .iter()
            .find(|exec| exec.matches(reference))
            .cloned()
            .ok_or_else(|| RunnerError::NotFound(reference.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FLOW_FILE: &str = r#"
namespace: tools
tags: [ci]
executables:
  - verb: build
    name: app
    aliases: [a]
    exec:
      cmd: echo build
  - verb: run
    name: all
    timeout: 10s
    serial:
      execs:
        - ref: build app
"#;

    #[test]
    fn test_load_flow_files() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/tools.flow"), FLOW_FILE).unwrap();
        std::fs::write(dir.path().join("ignored.yaml"), "not: a flow file").unwrap();

        let cache = ExecutableCache::load("ws", dir.path(), Some(Duration::from_secs(60))).unwrap();
        assert_eq!(cache.len(), 2);

        let build = cache
            .get_executable_by_ref(&"compile ws/tools:a".parse().unwrap())
            .unwrap();
        assert_eq!(build.name, "app");
        assert_eq!(build.tags, vec!["ci".to_string()]);
        assert_eq!(build.timeout, Some(Duration::from_secs(60)));
        assert_eq!(build.flowfile_path, dir.path().join("nested/tools.flow"));

        let all = cache
            .get_executable_by_ref(&"exec ws/tools:all".parse().unwrap())
            .unwrap();
        assert_eq!(all.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_not_found() {
        let cache = ExecutableCache::default();
        let err = cache
            .get_executable_by_ref(&"exec ws/missing".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, RunnerError::NotFound(_)));
    }

    #[test]
    fn test_invalid_executable_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("bad.flow"),
            "executables:\n  - verb: build\n    name: nothing\n",
        )
        .unwrap();

        let err = ExecutableCache::load("ws", dir.path(), None).unwrap_err();
        assert!(format!("{:#}", err).contains("exactly one of"));
    }
}
