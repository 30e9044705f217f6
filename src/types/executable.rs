//! Executable definitions as loaded from flow files

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::directory::Directory;
use super::parameter::{validate_arguments, Argument, Parameter};
use super::reference::{executable_id, Ref, Verb};
use super::serde_duration;
use crate::error::RunnerError;

/// Shell command or script file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecSpec {
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub dir: Directory,
    #[serde(default)]
    pub params: Vec<Parameter>,
    #[serde(default)]
    pub args: Vec<Argument>,
}

/// URI opened with the OS handler or a named application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSpec {
    pub uri: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub params: Vec<Parameter>,
    #[serde(default)]
    pub args: Vec<Argument>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveAs {
    #[default]
    Raw,
    Json,
    #[serde(alias = "indent-json", alias = "formatted-json")]
    IndentedJson,
    #[serde(alias = "yml")]
    Yaml,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFile {
    #[serde(default)]
    pub dir: Directory,
    pub filename: String,
    #[serde(default)]
    pub save_as: SaveAs,
}

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP request whose response can be transformed, logged and saved.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, deserialize_with = "serde_duration::deserialize")]
    pub timeout: Option<Duration>,
    /// Accepted status codes; empty means any 2xx
    #[serde(default)]
    pub valid_status_codes: Vec<u16>,
    #[serde(default)]
    pub transform_response: String,
    #[serde(default)]
    pub log_response: bool,
    #[serde(default)]
    pub response_file: Option<ResponseFile>,
    #[serde(default)]
    pub params: Vec<Parameter>,
    #[serde(default)]
    pub args: Vec<Argument>,
}

impl RequestSpec {
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }
}

/// Markdown template shown in the interactive view.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSpec {
    pub template_file: String,
    #[serde(default)]
    pub template_data_file: String,
    #[serde(default)]
    pub dir: Directory,
    #[serde(default)]
    pub params: Vec<Parameter>,
    #[serde(default)]
    pub args: Vec<Argument>,
}

/// One step of a serial or parallel executable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildExec {
    #[serde(default, rename = "ref")]
    pub reference: Option<Ref>,
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Expression; the step is skipped when it evaluates falsy
    #[serde(default, rename = "if")]
    pub condition: String,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub review_required: bool,
}

impl ChildExec {
    pub fn by_ref(reference: Ref) -> Self {
        Self {
            reference: Some(reference),
            ..Default::default()
        }
    }

    pub fn by_cmd(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Default::default()
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialSpec {
    pub execs: Vec<ChildExec>,
    #[serde(default)]
    pub fail_fast: Option<bool>,
    #[serde(default)]
    pub dir: Directory,
    #[serde(default)]
    pub params: Vec<Parameter>,
    #[serde(default)]
    pub args: Vec<Argument>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelSpec {
    pub execs: Vec<ChildExec>,
    #[serde(default)]
    pub fail_fast: Option<bool>,
    /// Concurrency bound; 0 runs every child at once
    #[serde(default)]
    pub max_threads: usize,
    #[serde(default)]
    pub dir: Directory,
    #[serde(default)]
    pub params: Vec<Parameter>,
    #[serde(default)]
    pub args: Vec<Argument>,
}

/// A named unit of work. Exactly one of the type specs is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Executable {
    #[serde(default)]
    pub verb: Verb,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "serde_duration::deserialize")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub exec: Option<ExecSpec>,
    #[serde(default)]
    pub launch: Option<LaunchSpec>,
    #[serde(default)]
    pub request: Option<RequestSpec>,
    #[serde(default)]
    pub render: Option<RenderSpec>,
    #[serde(default)]
    pub serial: Option<SerialSpec>,
    #[serde(default)]
    pub parallel: Option<ParallelSpec>,

    #[serde(skip)]
    pub workspace: String,
    #[serde(skip)]
    pub workspace_path: PathBuf,
    #[serde(skip)]
    pub namespace: String,
    #[serde(skip)]
    pub flowfile_path: PathBuf,
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

impl Executable {
    pub fn new(verb: Verb, name: impl Into<String>) -> Self {
        Self {
            verb,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_exec(mut self, spec: ExecSpec) -> Self {
        self.exec = Some(spec);
        self
    }

    pub fn with_launch(mut self, spec: LaunchSpec) -> Self {
        self.launch = Some(spec);
        self
    }

    pub fn with_request(mut self, spec: RequestSpec) -> Self {
        self.request = Some(spec);
        self
    }

    pub fn with_render(mut self, spec: RenderSpec) -> Self {
        self.render = Some(spec);
        self
    }

    pub fn with_serial(mut self, spec: SerialSpec) -> Self {
        self.serial = Some(spec);
        self
    }

    pub fn with_parallel(mut self, spec: ParallelSpec) -> Self {
        self.parallel = Some(spec);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_context(
        mut self,
        workspace: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
        namespace: impl Into<String>,
        flowfile_path: impl Into<PathBuf>,
    ) -> Self {
        self.workspace = workspace.into();
        self.workspace_path = workspace_path.into();
        self.namespace = namespace.into();
        self.flowfile_path = flowfile_path.into();
        self
    }

    /// Inline command step of a composite, run through the exec runner.
    pub fn for_cmd(parent: &Executable, cmd: &str, index: usize) -> Self {
        Self {
            verb: parent.verb.clone(),
            name: format!("{}-cmd-{}", parent.name, index),
            timeout: parent.timeout,
            exec: Some(ExecSpec {
                cmd: cmd.to_string(),
                ..Default::default()
            }),
            workspace: parent.workspace.clone(),
            workspace_path: parent.workspace_path.clone(),
            namespace: parent.namespace.clone(),
            flowfile_path: parent.flowfile_path.clone(),
            ..Default::default()
        }
    }

    pub fn id(&self) -> String {
        match non_empty(&self.workspace) {
            Some(ws) => executable_id(Some(ws), non_empty(&self.namespace), &self.name),
            None => "unk".to_string(),
        }
    }

    pub fn reference(&self) -> Ref {
        Ref {
            verb: self.verb.clone(),
            workspace: non_empty(&self.workspace).map(str::to_string),
            namespace: non_empty(&self.namespace).map(str::to_string),
            name: self.name.clone(),
        }
    }

    /// Whether `reference` names this executable, by name or alias.
    pub fn matches(&self, reference: &Ref) -> bool {
        if !self.verb.equals(&reference.verb) {
            return false;
        }
        if reference.workspace.as_deref() != non_empty(&self.workspace) {
            return false;
        }
        if reference.namespace.as_deref() != non_empty(&self.namespace) {
            return false;
        }
        reference.name == self.name || self.aliases.iter().any(|a| *a == reference.name)
    }

    pub fn flowfile_dir(&self) -> &Path {
        self.flowfile_path.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn type_name(&self) -> &'static str {
        if self.exec.is_some() {
            "exec"
        } else if self.launch.is_some() {
            "launch"
        } else if self.request.is_some() {
            "request"
        } else if self.render.is_some() {
            "render"
        } else if self.serial.is_some() {
            "serial"
        } else if self.parallel.is_some() {
            "parallel"
        } else {
            "none"
        }
    }

    pub fn parameters(&self) -> &[Parameter] {
        if let Some(spec) = &self.exec {
            &spec.params
        } else if let Some(spec) = &self.launch {
            &spec.params
        } else if let Some(spec) = &self.request {
            &spec.params
        } else if let Some(spec) = &self.render {
            &spec.params
        } else if let Some(spec) = &self.serial {
            &spec.params
        } else if let Some(spec) = &self.parallel {
            &spec.params
        } else {
            &[]
        }
    }

    pub fn arguments(&self) -> &[Argument] {
        if let Some(spec) = &self.exec {
            &spec.args
        } else if let Some(spec) = &self.launch {
            &spec.args
        } else if let Some(spec) = &self.request {
            &spec.args
        } else if let Some(spec) = &self.render {
            &spec.args
        } else if let Some(spec) = &self.serial {
            &spec.args
        } else if let Some(spec) = &self.parallel {
            &spec.args
        } else {
            &[]
        }
    }

    /// Give the exec, serial or parallel spec `dir` when it has none.
    pub fn inherit_dir(&mut self, dir: &Directory) {
        if dir.is_empty() {
            return;
        }
        let target = if let Some(spec) = self.exec.as_mut() {
            &mut spec.dir
        } else if let Some(spec) = self.serial.as_mut() {
            &mut spec.dir
        } else if let Some(spec) = self.parallel.as_mut() {
            &mut spec.dir
        } else {
            return;
        };
        if target.is_empty() {
            *target = dir.clone();
        }
    }

    pub fn validate(&self) -> Result<(), RunnerError> {
        self.verb.validate()?;
        let set = [
            self.exec.is_some(),
            self.launch.is_some(),
            self.request.is_some(),
            self.render.is_some(),
            self.serial.is_some(),
            self.parallel.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if set != 1 {
            return Err(RunnerError::Validation(format!(
                "executable {} must define exactly one of exec, launch, request, render, serial or parallel",
                self.id()
            )));
        }
        for param in self.parameters() {
            param.validate()?;
        }
        validate_arguments(self.arguments())
    }
}
