//! Markdown template runner

use async_trait::async_trait;
use minijinja::value::{from_args, Enumerator, Object, ObjectRepr};
use minijinja::{Environment, State};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::Runner;
use crate::context::RunContext;
use crate::env::resolve_env;
use crate::error::{ResultExt, RunnerError};
use crate::types::{EnvMap, Executable};

#[derive(Debug, Default)]
pub struct RenderRunner;

impl RenderRunner {
    pub fn new() -> Self {
        Self
    }
}

/// Load template data from a `.json`, `.yaml` or `.yml` file.
fn load_template_data(path: &Path) -> Result<Value, RunnerError> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read template data file {}", path.display()))?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(serde_json::from_str(&content)?),
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
        _ => {
            warn!(path = %path.display(), "unsupported template data format, ignoring");
            Ok(Value::Null)
        }
    }
}

/// Environment exposed to templates, usable as `env.KEY` or `env("KEY")`.
#[derive(Debug)]
struct TemplateEnv(EnvMap);

impl Object for TemplateEnv {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_value(self: &Arc<Self>, key: &minijinja::Value) -> Option<minijinja::Value> {
        self.0.get(key.as_str()?).map(|v| minijinja::Value::from(v.as_str()))
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        Enumerator::Values(keys.into_iter().map(|k| minijinja::Value::from(k.as_str())).collect())
    }

    fn call(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        args: &[minijinja::Value],
    ) -> Result<minijinja::Value, minijinja::Error> {
        let (key,): (String,) = from_args(args)?;
        Ok(minijinja::Value::from(
            self.0.get(&key).cloned().unwrap_or_default(),
        ))
    }
}

/// Render `template` with the data's fields at the top level, the data
/// itself under `data`, and the environment as `env` and `env(key)`.
pub fn render_template(template: &str, data: &Value, env: &EnvMap) -> Result<String, RunnerError> {
    let mut jinja = Environment::new();
    jinja.add_template("template", template)?;

    let mut context: BTreeMap<String, minijinja::Value> = match data {
        Value::Object(fields) => fields
            .iter()
            .map(|(k, v)| (k.clone(), minijinja::Value::from_serialize(v)))
            .collect(),
        _ => BTreeMap::new(),
    };
    context.insert("data".to_string(), minijinja::Value::from_serialize(data));
    context.insert(
        "env".to_string(),
        minijinja::Value::from_object(TemplateEnv(env.clone())),
    );

    let rendered = jinja
        .get_template("template")?
        .render(minijinja::Value::from_serialize(&context))?;
    Ok(rendered)
}

#[async_trait]
impl Runner for RenderRunner {
    fn name(&self) -> &'static str {
        "render"
    }

    fn is_compatible(&self, executable: &Executable) -> bool {
        executable.render.is_some()
    }

    async fn exec(
        &self,
        ctx: &RunContext,
        executable: &Executable,
        prompted_env: &EnvMap,
    ) -> Result<(), RunnerError> {
        let spec = executable
            .render
            .as_ref()
            .ok_or_else(|| RunnerError::Validation("executable has no render spec".to_string()))?;
        let view = match ctx.view() {
            Some(view) if view.is_active() => view.clone(),
            _ => return Err(RunnerError::NotInteractive),
        };

        let env = resolve_env(ctx, executable, prompted_env)?.env;
        let dir = ctx.resolve_directory(&spec.dir, executable, &env)?;

        let template_path = dir.join(&spec.template_file);
        let template = std::fs::read_to_string(&template_path)
            .with_context(|| format!("unable to read template file {}", template_path.display()))?;
        let data = if spec.template_data_file.is_empty() {
            Value::Null
        } else {
            load_template_data(&dir.join(&spec.template_data_file))?
        };

        let rendered = render_template(&template, &data, &env)
            .with_context(|| format!("unable to render {}", template_path.display()))?;
        view.show_markdown(&spec.template_file, &rendered)?;
        info!(executable = %executable.id(), template = %template_path.display(), "rendered template");
        Ok(())
    }
}
