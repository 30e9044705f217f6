//! Working directory expressions

use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

use super::EnvMap;

/// Sentinel resolving to the temp directory shared by one run.
pub const TMP_DIR_LABEL: &str = "f:tmp";

/// Directory expression as written in a flow file.
///
/// - empty: the flow file's directory
/// - `//path`: relative to the workspace root
/// - `.` or `./path`: relative to the current directory
/// - `~/path`: relative to the home directory
/// - `/path`: absolute
/// - anything else: relative to the flow file's directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Directory(String);

impl Directory {
    pub fn new(dir: impl Into<String>) -> Self {
        Self(dir.into())
    }

    pub fn tmp() -> Self {
        Self(TMP_DIR_LABEL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_tmp(&self) -> bool {
        self.0 == TMP_DIR_LABEL
    }

    /// Resolve everything except the tmp sentinel, which needs run state.
    pub fn expand(&self, workspace_path: &Path, flowfile_path: &Path, env: &EnvMap) -> PathBuf {
        expand_directory(&self.0, workspace_path, flowfile_path, env)
    }
}

/// Substitute `$VAR` and `${VAR}` from `env`. Unknown keys become empty.
pub fn expand_env(value: &str, env: &EnvMap) -> String {
    shellexpand::env_with_context_no_errors(value, |key: &str| {
        Some(match env.get(key) {
            Some(v) => v.clone(),
            None => {
                warn!(key, "unable to find env key while expanding");
                String::new()
            }
        })
    })
    .into_owned()
}

pub fn expand_directory(
    dir: &str,
    workspace_path: &Path,
    flowfile_path: &Path,
    env: &EnvMap,
) -> PathBuf {
    let flowfile_dir = flowfile_path.parent().unwrap_or_else(|| Path::new(""));
    let dir = expand_env(dir, env);

    let target = if dir.is_empty() {
        flowfile_dir.to_path_buf()
    } else if let Some(rest) = dir.strip_prefix("//") {
        workspace_path.join(rest)
    } else if dir == "." || dir.starts_with("./") {
        let cwd = std::env::current_dir().unwrap_or_default();
        cwd.join(dir.strip_prefix("./").unwrap_or(""))
    } else if dir == "~" || dir.starts_with("~/") {
        PathBuf::from(shellexpand::tilde(&dir).into_owned())
    } else if dir.starts_with('/') {
        PathBuf::from(&dir)
    } else {
        flowfile_dir.join(&dir)
    };

    clean_path(&target)
}

/// Lexically normalize a path, dropping `.` and resolving `..`.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
