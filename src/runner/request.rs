//! HTTP request runner

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use super::Runner;
use crate::context::RunContext;
use crate::env::resolve_env;
use crate::error::{ResultExt, RunnerError};
use crate::services::{ExprEvaluator, ExpressionData, Request, Response, RestClient};
use crate::types::{expand_env, EnvMap, Executable, ResponseFile, SaveAs};

pub struct RequestRunner {
    rest: Arc<dyn RestClient>,
    expr: Arc<dyn ExprEvaluator>,
}

impl RequestRunner {
    pub fn new(rest: Arc<dyn RestClient>, expr: Arc<dyn ExprEvaluator>) -> Self {
        Self { rest, expr }
    }

    /// Apply `expression` to the response; `body` is parsed JSON when possible.
    fn transform(
        &self,
        expression: &str,
        executable: &Executable,
        env: &EnvMap,
        response: &Response,
    ) -> Result<String, RunnerError> {
        let body = serde_json::from_str::<serde_json::Value>(&response.body)
            .unwrap_or_else(|_| json!(response.body));
        let data = ExpressionData::new(executable, env)
            .with("body", body)
            .with("status", json!(response.status))
            .with("headers", json!(response.headers));
        self.expr
            .evaluate_string(expression, &data)
            .context("unable to transform response")
    }
}

/// Render a response body in the requested file format.
pub fn format_response(body: &str, save_as: SaveAs) -> Result<String, RunnerError> {
    match save_as {
        SaveAs::Raw => Ok(body.to_string()),
        SaveAs::Json => {
            let value: serde_json::Value = serde_json::from_str(body)?;
            Ok(serde_json::to_string(&value)?)
        }
        SaveAs::IndentedJson => {
            let value: serde_json::Value = serde_json::from_str(body)?;
            Ok(serde_json::to_string_pretty(&value)?)
        }
        SaveAs::Yaml => {
            let value: serde_json::Value = serde_json::from_str(body)?;
            Ok(serde_yaml::to_string(&value)?)
        }
    }
}

fn save_response(
    ctx: &RunContext,
    executable: &Executable,
    file: &ResponseFile,
    env: &EnvMap,
    body: &str,
) -> Result<(), RunnerError> {
    let dir = ctx.resolve_directory(&file.dir, executable, env)?;
    let path = dir.join(expand_env(&file.filename, env));
    let content = format_response(body, file.save_as).context("unable to format response")?;

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("unable to create directory {}", dir.display()))?;
    std::fs::write(&path, content)
        .with_context(|| format!("unable to write response to {}", path.display()))?;
    info!(path = %path.display(), "response saved");
    Ok(())
}

#[async_trait]
impl Runner for RequestRunner {
    fn name(&self) -> &'static str {
        "request"
    }

    fn is_compatible(&self, executable: &Executable) -> bool {
        executable.request.is_some()
    }

    async fn exec(
        &self,
        ctx: &RunContext,
        executable: &Executable,
        prompted_env: &EnvMap,
    ) -> Result<(), RunnerError> {
        let spec = executable
            .request
            .as_ref()
            .ok_or_else(|| RunnerError::Validation("executable has no request spec".to_string()))?;
        if spec.url.trim().is_empty() {
            return Err(RunnerError::Validation("request url must be specified".to_string()));
        }

        let env = resolve_env(ctx, executable, prompted_env)?.env;
        let request = Request {
            url: expand_env(&spec.url, &env),
            method: spec.method,
            body: expand_env(&spec.body, &env),
            headers: spec
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), expand_env(v, &env)))
                .collect(),
            timeout: spec.timeout(),
        };
        debug!(method = request.method.as_str(), url = %request.url, "sending request");

        let response = tokio::select! {
            response = self.rest.send_request(&request, &spec.valid_status_codes) => response?,
            _ = ctx.cancel_token().cancelled() => return Err(RunnerError::Cancelled),
        };

        let body = if spec.transform_response.is_empty() {
            response.body.clone()
        } else {
            self.transform(&spec.transform_response, executable, &env, &response)?
        };

        if spec.log_response {
            info!(
                executable = %executable.id(),
                status = response.status,
                "successfully sent request\n{}",
                body
            );
        } else {
            info!(executable = %executable.id(), status = response.status, "successfully sent request");
        }

        if let Some(file) = &spec.response_file {
            save_response(ctx, executable, file, &env, &body)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ExecutableCache;
    use crate::services::rest::status_accepted;
    use crate::services::JinjaEvaluator;
    use crate::types::{Directory, HttpMethod, Parameter, RequestSpec, Verb};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct MockRestClient {
        status: u16,
        body: String,
        sent: Mutex<Vec<Request>>,
    }

    impl MockRestClient {
        fn new(status: u16, body: &str) -> Self {
            Self {
                status,
                body: body.to_string(),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RestClient for MockRestClient {
        async fn send_request(
            &self,
            request: &Request,
            valid_status_codes: &[u16],
        ) -> Result<Response, RunnerError> {
            self.sent.lock().unwrap().push(request.clone());
            if !status_accepted(self.status, valid_status_codes) {
                return Err(RunnerError::UnexpectedStatus {
                    status: self.status,
                    body: self.body.clone(),
                });
            }
            Ok(Response {
                status: self.status,
                headers: HashMap::new(),
                body: self.body.clone(),
            })
        }
    }

    fn create_test_runner(rest: Arc<MockRestClient>) -> RequestRunner {
        RequestRunner::new(rest, Arc::new(JinjaEvaluator::new()))
    }

    fn request_in(ws_path: &std::path::Path, spec: RequestSpec) -> Executable {
        Executable::new(Verb::new("get"), "users")
            .with_request(spec)
            .with_context("ws", ws_path, "", ws_path.join("api.flow"))
    }

    #[tokio::test]
    async fn test_request_is_expanded() {
        let dir = tempdir().unwrap();
        let rest = Arc::new(MockRestClient::new(200, "{}"));
        let exec = request_in(
            dir.path(),
            RequestSpec {
                url: "https://api.example.com/users/$USER_ID".into(),
                method: HttpMethod::Post,
                body: r#"{"name": "$NAME"}"#.into(),
                headers: HashMap::from([("Authorization".to_string(), "Bearer $TOKEN".to_string())]),
                params: vec![
                    Parameter::text("USER_ID", "42"),
                    Parameter::text("NAME", "ada"),
                    Parameter::text("TOKEN", "abc"),
                ],
                ..Default::default()
            },
        );
        let ctx = RunContext::new("ws", dir.path(), Arc::new(ExecutableCache::default()));

        create_test_runner(rest.clone())
            .exec(&ctx, &exec, &EnvMap::new())
            .await
            .unwrap();

        let sent = rest.sent.lock().unwrap();
        assert_eq!(sent[0].url, "https://api.example.com/users/42");
        assert_eq!(sent[0].method, HttpMethod::Post);
        assert_eq!(sent[0].body, r#"{"name": "ada"}"#);
        assert_eq!(sent[0].headers["Authorization"], "Bearer abc");
        assert_eq!(sent[0].timeout, std::time::Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_unexpected_status() {
        let dir = tempdir().unwrap();
        let rest = Arc::new(MockRestClient::new(500, "boom"));
        let exec = request_in(
            dir.path(),
            RequestSpec {
                url: "https://api.example.com".into(),
                ..Default::default()
            },
        );
        let ctx = RunContext::new("ws", dir.path(), Arc::new(ExecutableCache::default()));

        let err = create_test_runner(rest)
            .exec(&ctx, &exec, &EnvMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::UnexpectedStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_transformed_response_is_saved() {
        let dir = tempdir().unwrap();
        let rest = Arc::new(MockRestClient::new(
            201,
            r#"{"user": {"name": "ada", "id": 7}}"#,
        ));
        let exec = request_in(
            dir.path(),
            RequestSpec {
                url: "https://api.example.com".into(),
                valid_status_codes: vec![201],
                transform_response: "body.user.name ~ '-' ~ status".into(),
                response_file: Some(ResponseFile {
                    dir: Directory::new("//out"),
                    filename: "user.txt".into(),
                    save_as: SaveAs::Raw,
                }),
                ..Default::default()
            },
        );
        let ctx = RunContext::new("ws", dir.path(), Arc::new(ExecutableCache::default()));

        create_test_runner(rest)
            .exec(&ctx, &exec, &EnvMap::new())
            .await
            .unwrap();

        let saved = std::fs::read_to_string(dir.path().join("out/user.txt")).unwrap();
        assert_eq!(saved, "ada-201");
    }

    #[tokio::test]
    async fn test_response_saved_as_yaml() {
        let dir = tempdir().unwrap();
        let rest = Arc::new(MockRestClient::new(200, r#"{"name": "ada"}"#));
        let exec = request_in(
            dir.path(),
            RequestSpec {
                url: "https://api.example.com".into(),
                response_file: Some(ResponseFile {
                    dir: Directory::default(),
                    filename: "user.yaml".into(),
                    save_as: SaveAs::Yaml,
                }),
                ..Default::default()
            },
        );
        let ctx = RunContext::new("ws", dir.path(), Arc::new(ExecutableCache::default()));

        create_test_runner(rest)
            .exec(&ctx, &exec, &EnvMap::new())
            .await
            .unwrap();

        let saved = std::fs::read_to_string(dir.path().join("user.yaml")).unwrap();
        assert_eq!(saved.trim(), "name: ada");
    }

    #[test]
    fn test_format_response() {
        let body = r#"{ "a": 1 }"#;
        assert_eq!(format_response(body, SaveAs::Raw).unwrap(), body);
        assert_eq!(format_response(body, SaveAs::Json).unwrap(), r#"{"a":1}"#);
        assert_eq!(
            format_response(body, SaveAs::IndentedJson).unwrap(),
            "{\n  \"a\": 1\n}"
        );
        assert_eq!(format_response(body, SaveAs::Yaml).unwrap().trim(), "a: 1");
        assert!(format_response("not json", SaveAs::Json).is_err());
    }
}
