//! Environment resolution for executables
//!
//! Layers, lowest precedence first:
//! 1. runner defaults (`FLOW_*`)
//! 2. environment inherited from a parent serial/parallel executable
//! 3. declared parameters
//! 4. declared arguments

use std::collections::HashMap;
use tracing::warn;

use crate::context::RunContext;
use crate::error::RunnerError;
use crate::services::vault::{validate_reference, Vault};
use crate::types::{expand_env, Argument, EnvMap, Executable, Parameter, ParameterSource};

pub const FLOW_RUNNER: &str = "FLOW_RUNNER";
pub const FLOW_CURRENT_WORKSPACE: &str = "FLOW_CURRENT_WORKSPACE";
pub const FLOW_CURRENT_NAMESPACE: &str = "FLOW_CURRENT_NAMESPACE";
pub const FLOW_TMP_DIRECTORY: &str = "FLOW_TMP_DIRECTORY";
pub const FLOW_EXECUTABLE_NAME: &str = "FLOW_EXECUTABLE_NAME";
pub const FLOW_DEFINITION_PATH: &str = "FLOW_DEFINITION_PATH";
pub const FLOW_DEFINITION_DIR: &str = "FLOW_DEFINITION_DIR";
pub const FLOW_WORKSPACE_PATH: &str = "FLOW_WORKSPACE_PATH";
pub const DISABLE_FLOW_INTERACTIVE: &str = "DISABLE_FLOW_INTERACTIVE";

/// Value for one parameter. A caller-supplied value for its env key wins.
pub fn resolve_parameter_value(
    vault: &dyn Vault,
    param: &Parameter,
    prompted_env: &EnvMap,
) -> Result<String, RunnerError> {
    if let Some(value) = prompted_env.get(&param.env_key) {
        return Ok(value.clone());
    }

    match param.source() {
        ParameterSource::Unset => Ok(String::new()),
        ParameterSource::Text(text) => Ok(text.to_string()),
        ParameterSource::Prompt(_) => Err(RunnerError::Validation(format!(
            "{}: failed to get value for parameter",
            param.env_key
        ))),
        ParameterSource::Secret(reference) => {
            validate_reference(reference)?;
            Ok(vault.get_secret(reference)?.expose().to_string())
        }
    }
}

/// Resolve every parameter, reporting all failures together.
pub fn resolve_parameters(
    vault: &dyn Vault,
    params: &[Parameter],
    prompted_env: &EnvMap,
) -> Result<EnvMap, RunnerError> {
    let mut env = EnvMap::new();
    let mut errors = Vec::new();

    for param in params {
        match resolve_parameter_value(vault, param, prompted_env) {
            Ok(value) => {
                env.insert(param.env_key.clone(), value);
            }
            Err(RunnerError::Validation(msg)) => errors.push(msg),
            Err(err) => errors.push(format!("{}: {}", param.env_key, err)),
        }
    }

    if errors.is_empty() {
        Ok(env)
    } else {
        Err(RunnerError::Parameters(errors))
    }
}

/// Bind command line tokens to declared arguments.
///
/// `name=value` tokens fill flags and the rest fill positions (1-based).
/// Values are expanded against `env`; a caller-supplied value for an
/// argument's env key wins over the command line.
pub fn resolve_arguments(
    args: &[Argument],
    cli_args: &[String],
    prompted_env: &EnvMap,
    env: &EnvMap,
) -> Result<EnvMap, RunnerError> {
    let mut flags: HashMap<&str, &str> = HashMap::new();
    let mut positional: Vec<&str> = Vec::new();
    for token in cli_args {
        match token.split_once('=') {
            Some((flag, value)) => {
                flags.insert(flag, value);
            }
            None => positional.push(token),
        }
    }

    for flag in flags.keys() {
        if !args.iter().any(|a| a.flag.as_deref() == Some(*flag)) {
            warn!(flag, "ignoring unknown argument flag");
        }
    }

    let mut resolved = EnvMap::new();
    let mut errors = Vec::new();

    for arg in args {
        let provided = if let Some(value) = prompted_env.get(&arg.env_key) {
            Some(value.clone())
        } else if let Some(flag) = &arg.flag {
            flags.get(flag.as_str()).map(|v| expand_env(v, env))
        } else {
            arg.pos
                .and_then(|pos| positional.get(pos.saturating_sub(1)))
                .map(|v| expand_env(v, env))
        };
        let value = provided.or_else(|| arg.default.clone()).unwrap_or_default();

        if let Err(msg) = arg.check_value(&value) {
            errors.push(msg);
            continue;
        }
        resolved.insert(arg.env_key.clone(), value);
    }

    if errors.is_empty() {
        Ok(resolved)
    } else {
        Err(RunnerError::Arguments(errors))
    }
}

/// Parameters and arguments only, with `base` available for expansion.
pub fn declared_env(
    vault: &dyn Vault,
    params: &[Parameter],
    args: &[Argument],
    cli_args: &[String],
    prompted_env: &EnvMap,
    base: &EnvMap,
) -> Result<EnvMap, RunnerError> {
    let mut declared = resolve_parameters(vault, params, prompted_env)?;

    let mut expansion = base.clone();
    expansion.extend(declared.iter().map(|(k, v)| (k.clone(), v.clone())));

    declared.extend(resolve_arguments(args, cli_args, prompted_env, &expansion)?);
    Ok(declared)
}

/// `base` overlaid with resolved parameters, then arguments.
pub fn build_env_map(
    vault: &dyn Vault,
    params: &[Parameter],
    args: &[Argument],
    cli_args: &[String],
    prompted_env: &EnvMap,
    base: EnvMap,
) -> Result<EnvMap, RunnerError> {
    let declared = declared_env(vault, params, args, cli_args, prompted_env, &base)?;
    let mut env = base;
    env.extend(declared);
    Ok(env)
}

/// `KEY=VALUE` entries sorted by key.
pub fn build_env_list(
    vault: &dyn Vault,
    params: &[Parameter],
    args: &[Argument],
    cli_args: &[String],
    prompted_env: &EnvMap,
    base: EnvMap,
) -> Result<Vec<String>, RunnerError> {
    let env = build_env_map(vault, params, args, cli_args, prompted_env, base)?;
    Ok(to_env_list(&env))
}

pub fn to_env_list(env: &EnvMap) -> Vec<String> {
    let mut list: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    list.sort();
    list
}

/// Variables the runner sets for every executable.
pub fn default_env(ctx: &RunContext, executable: &Executable) -> EnvMap {
    let mut env = EnvMap::from([
        (FLOW_RUNNER.to_string(), "true".to_string()),
        (FLOW_CURRENT_WORKSPACE.to_string(), ctx.workspace.clone()),
        (FLOW_CURRENT_NAMESPACE.to_string(), ctx.namespace.clone()),
        (FLOW_EXECUTABLE_NAME.to_string(), executable.name.clone()),
        (
            FLOW_DEFINITION_PATH.to_string(),
            executable.flowfile_path.display().to_string(),
        ),
        (
            FLOW_DEFINITION_DIR.to_string(),
            executable.flowfile_dir().display().to_string(),
        ),
        (
            FLOW_WORKSPACE_PATH.to_string(),
            ctx.workspace_path.display().to_string(),
        ),
        (
            DISABLE_FLOW_INTERACTIVE.to_string(),
            (!ctx.is_interactive()).to_string(),
        ),
    ]);
    if let Some(tmp) = ctx.tmp_dir() {
        env.insert(FLOW_TMP_DIRECTORY.to_string(), tmp.display().to_string());
    }
    env
}

/// Full environment of an executable, plus the declared part that a
/// composite passes down to its children.
#[derive(Debug, Clone, Default)]
pub struct ResolvedEnv {
    pub env: EnvMap,
    pub declared: EnvMap,
}

pub fn resolve_env(
    ctx: &RunContext,
    executable: &Executable,
    prompted_env: &EnvMap,
) -> Result<ResolvedEnv, RunnerError> {
    let mut base = default_env(ctx, executable);
    base.extend(ctx.inherited_env().iter().map(|(k, v)| (k.clone(), v.clone())));

    let declared = declared_env(
        ctx.vault(),
        executable.parameters(),
        executable.arguments(),
        &ctx.args,
        prompted_env,
        &base,
    )?;

    let mut env = base;
    env.extend(declared.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(ResolvedEnv { env, declared })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ExecutableCache;
    use crate::services::MemoryVault;
    use crate::types::{ArgumentType, ExecSpec, Verb};
    use std::sync::Arc;

    fn vault() -> MemoryVault {
        MemoryVault::new().with_secret("api-token", "s3cr3t")
    }

    fn env(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolve_parameter_sources() {
        let vault = vault();
        let none = EnvMap::new();

        assert_eq!(
            resolve_parameter_value(&vault, &Parameter::text("A", "literal"), &none).unwrap(),
            "literal"
        );
        assert_eq!(
            resolve_parameter_value(&vault, &Parameter::secret("A", "api-token"), &none).unwrap(),
            "s3cr3t"
        );
        assert_eq!(
            resolve_parameter_value(&vault, &Parameter::prompt("A", "Value?"), &env(&[("A", "typed")]))
                .unwrap(),
            "typed"
        );
        assert_eq!(
            resolve_parameter_value(&vault, &Parameter::default(), &none).unwrap(),
            ""
        );
    }

    #[test]
    fn test_prompted_value_overrides_literal() {
        let value = resolve_parameter_value(
            &vault(),
            &Parameter::text("A", "literal"),
            &env(&[("A", "override")]),
        )
        .unwrap();
        assert_eq!(value, "override");
    }

    #[test]
    fn test_parameter_failures() {
        let vault = vault();
        let none = EnvMap::new();

        let err = resolve_parameter_value(&vault, &Parameter::prompt("A", "?"), &none).unwrap_err();
        assert!(err.to_string().contains("failed to get value for parameter"));

        let err = resolve_parameter_value(&vault, &Parameter::secret("A", "bad ref"), &none).unwrap_err();
        assert!(matches!(err, RunnerError::Secret(_)));

        let err = resolve_parameter_value(&vault, &Parameter::secret("A", "missing"), &none).unwrap_err();
        assert!(matches!(err, RunnerError::Secret(_)));
    }

    #[test]
    fn test_parameter_errors_are_collected() {
        let params = vec![
            Parameter::prompt("FIRST", "?"),
            Parameter::text("OK", "fine"),
            Parameter::secret("SECOND", "missing"),
        ];

        match resolve_parameters(&vault(), &params, &EnvMap::new()) {
            Err(RunnerError::Parameters(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].starts_with("FIRST"));
                assert!(errors[1].starts_with("SECOND"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_arguments() {
        let args = vec![
            Argument::flag("MODE", "mode").with_default("debug"),
            Argument::positional("TARGET", 1).required(),
            Argument::flag("COUNT", "count").with_type(ArgumentType::Int),
        ];
        let cli = vec!["mode=release".to_string(), "$HOME_DIR/app".to_string()];
        let expansion = env(&[("HOME_DIR", "/home/me")]);

        let resolved = resolve_arguments(&args, &cli, &EnvMap::new(), &expansion).unwrap();
        assert_eq!(resolved["MODE"], "release");
        assert_eq!(resolved["TARGET"], "/home/me/app");
        assert_eq!(resolved["COUNT"], "");
    }

    #[test]
    fn test_argument_errors() {
        let args = vec![
            Argument::positional("TARGET", 1).required(),
            Argument::flag("COUNT", "count").with_type(ArgumentType::Int),
        ];
        let cli = vec!["count=many".to_string()];

        match resolve_arguments(&args, &cli, &EnvMap::new(), &EnvMap::new()) {
            Err(RunnerError::Arguments(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_build_env_map_precedence() {
        let params = vec![Parameter::text("SHARED", "from-param"), Parameter::text("P", "p")];
        let args = vec![Argument::flag("SHARED", "shared")];
        let base = env(&[("SHARED", "from-base"), ("BASE", "b")]);

        let map = build_env_map(
            &vault(),
            &params,
            &args,
            &["shared=from-arg".to_string()],
            &EnvMap::new(),
            base.clone(),
        )
        .unwrap();
        assert_eq!(map["SHARED"], "from-arg");
        assert_eq!(map["P"], "p");
        assert_eq!(map["BASE"], "b");

        let map = build_env_map(&vault(), &params, &[], &[], &EnvMap::new(), base).unwrap();
        assert_eq!(map["SHARED"], "from-param");
    }

    #[test]
    fn test_build_env_list_sorted() {
        let list = build_env_list(
            &vault(),
            &[Parameter::text("B", "2"), Parameter::text("A", "1")],
            &[],
            &[],
            &EnvMap::new(),
            EnvMap::new(),
        )
        .unwrap();
        assert_eq!(list, vec!["A=1".to_string(), "B=2".to_string()]);
    }

    #[test]
    fn test_resolve_env_layers() {
        let exec = Executable::new(Verb::default(), "app")
            .with_exec(ExecSpec {
                cmd: "true".into(),
                params: vec![Parameter::text("LEVEL", "child")],
                ..Default::default()
            })
            .with_context("ws", "/ws", "ns", "/ws/apps/app.flow");

        let ctx = RunContext::new("ws", "/ws", Arc::new(ExecutableCache::default()))
            .child(env(&[("LEVEL", "parent"), ("INHERITED", "yes")]));

        let resolved = resolve_env(&ctx, &exec, &EnvMap::new()).unwrap();
        assert_eq!(resolved.env["LEVEL"], "child");
        assert_eq!(resolved.env["INHERITED"], "yes");
        assert_eq!(resolved.env[FLOW_RUNNER], "true");
        assert_eq!(resolved.env[FLOW_EXECUTABLE_NAME], "app");
        assert_eq!(resolved.env[FLOW_DEFINITION_DIR], "/ws/apps");
        assert_eq!(resolved.env[DISABLE_FLOW_INTERACTIVE], "true");
        assert_eq!(resolved.declared.len(), 1);
    }
}
