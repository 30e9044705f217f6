//! Parameter and argument declarations

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;

use crate::error::RunnerError;

/// Env keys with this prefix are set by the runner itself.
pub const RESERVED_ENV_PREFIX: &str = "FLOW_";

static ENV_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").unwrap());

fn validate_env_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("must set envKey".to_string());
    }
    if key.starts_with(RESERVED_ENV_PREFIX) {
        return Err(format!(
            "env key {} cannot start with reserved prefix {}",
            key, RESERVED_ENV_PREFIX
        ));
    }
    if !ENV_KEY_RE.is_match(key) {
        return Err(format!("env key {} must only contain alphanumeric characters and underscores", key));
    }
    Ok(())
}

/// Environment variable sourced from a literal, a secret, or a prompt answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub env_key: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub secret_ref: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Where a parameter's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSource<'a> {
    Text(&'a str),
    Secret(&'a str),
    Prompt(&'a str),
    Unset,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl Parameter {
    pub fn text(env_key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            env_key: env_key.into(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn secret(env_key: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            env_key: env_key.into(),
            secret_ref: Some(reference.into()),
            ..Default::default()
        }
    }

    pub fn prompt(env_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            env_key: env_key.into(),
            prompt: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn source(&self) -> ParameterSource<'_> {
        if let Some(text) = non_empty(&self.text) {
            ParameterSource::Text(text)
        } else if let Some(reference) = non_empty(&self.secret_ref) {
            ParameterSource::Secret(reference)
        } else if let Some(prompt) = non_empty(&self.prompt) {
            ParameterSource::Prompt(prompt)
        } else {
            ParameterSource::Unset
        }
    }

    pub fn validate(&self) -> Result<(), RunnerError> {
        let set = [&self.text, &self.secret_ref, &self.prompt]
            .into_iter()
            .filter(|v| non_empty(v).is_some())
            .count();
        if set == 0 {
            return Err(RunnerError::Validation(format!(
                "parameter {}: must set one of text, secretRef or prompt",
                self.env_key
            )));
        }
        if set > 1 {
            return Err(RunnerError::Validation(format!(
                "parameter {}: only one of text, secretRef or prompt may be set",
                self.env_key
            )));
        }
        validate_env_key(&self.env_key).map_err(RunnerError::Validation)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentType {
    #[default]
    String,
    Int,
    Float,
    Bool,
}

/// Command line argument bound to an env key, by flag (`name=value`) or position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Argument {
    pub env_key: String,
    #[serde(default)]
    pub flag: Option<String>,
    /// 1-based position among positional arguments
    #[serde(default)]
    pub pos: Option<usize>,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "type")]
    pub arg_type: ArgumentType,
}

impl Argument {
    pub fn flag(env_key: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            env_key: env_key.into(),
            flag: Some(flag.into()),
            ..Default::default()
        }
    }

    pub fn positional(env_key: impl Into<String>, pos: usize) -> Self {
        Self {
            env_key: env_key.into(),
            pos: Some(pos),
            ..Default::default()
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_type(mut self, arg_type: ArgumentType) -> Self {
        self.arg_type = arg_type;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn validate(&self) -> Result<(), RunnerError> {
        match (&self.flag, self.pos) {
            (Some(_), Some(_)) => {
                return Err(RunnerError::Validation(format!(
                    "argument {}: cannot set both flag and pos",
                    self.env_key
                )))
            }
            (None, None) => {
                return Err(RunnerError::Validation(format!(
                    "argument {}: must set either flag or pos",
                    self.env_key
                )))
            }
            (None, Some(0)) => {
                return Err(RunnerError::Validation(format!(
                    "argument {}: pos must be at least 1",
                    self.env_key
                )))
            }
            _ => {}
        }
        validate_env_key(&self.env_key).map_err(RunnerError::Validation)
    }

    /// Check a resolved value against `required` and the declared type.
    pub fn check_value(&self, value: &str) -> Result<(), String> {
        if value.is_empty() {
            return if self.required {
                Err(format!("required argument {} not set", self.env_key))
            } else {
                Ok(())
            };
        }
        let ok = match self.arg_type {
            ArgumentType::String => true,
            ArgumentType::Int => value.parse::<i64>().is_ok(),
            ArgumentType::Float => value.parse::<f64>().is_ok(),
            ArgumentType::Bool => value.parse::<bool>().is_ok(),
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "value {:?} for argument {} is not a valid {:?}",
                value, self.env_key, self.arg_type
            ))
        }
    }
}

/// Validate each argument and check that flags and positions are unique.
pub fn validate_arguments(args: &[Argument]) -> Result<(), RunnerError> {
    let mut flags = HashSet::new();
    let mut positions = HashSet::new();
    for arg in args {
        arg.validate()?;
        if let Some(flag) = &arg.flag {
            if !flags.insert(flag.as_str()) {
                return Err(RunnerError::Validation(format!("duplicate argument flag {}", flag)));
            }
        }
        if let Some(pos) = arg.pos {
            if !positions.insert(pos) {
                return Err(RunnerError::Validation(format!("duplicate argument position {}", pos)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_requires_exactly_one_source() {
        assert!(Parameter::text("KEY", "v").validate().is_ok());
        assert!(Parameter::default().validate().is_err());

        let both = Parameter {
            env_key: "KEY".into(),
            text: Some("v".into()),
            secret_ref: Some("secret".into()),
            prompt: None,
        };
        assert!(both.validate().is_err());
    }

    #[test]
    fn test_parameter_env_key_rules() {
        assert!(Parameter::text("FLOW_KEY", "v").validate().is_err());
        assert!(Parameter::text("MY-KEY", "v").validate().is_err());
        assert!(Parameter::text("", "v").validate().is_err());
        assert!(Parameter::text("my_key_2", "v").validate().is_ok());
    }

    #[test]
    fn test_parameter_source() {
        assert_eq!(Parameter::text("A", "x").source(), ParameterSource::Text("x"));
        assert_eq!(Parameter::secret("A", "s").source(), ParameterSource::Secret("s"));
        assert_eq!(Parameter::prompt("A", "?").source(), ParameterSource::Prompt("?"));
        assert_eq!(Parameter::text("A", "").source(), ParameterSource::Unset);
    }

    #[test]
    fn test_argument_validation() {
        assert!(Argument::flag("A", "a").validate().is_ok());
        assert!(Argument::positional("A", 1).validate().is_ok());
        assert!(Argument::positional("A", 0).validate().is_err());
        assert!(Argument {
            env_key: "A".into(),
            ..Default::default()
        }
        .validate()
        .is_err());

        let dup = vec![Argument::flag("A", "x"), Argument::flag("B", "x")];
        assert!(validate_arguments(&dup).is_err());
    }

    #[test]
    fn test_argument_check_value() {
        let arg = Argument::flag("COUNT", "count").with_type(ArgumentType::Int);
        assert!(arg.check_value("3").is_ok());
        assert!(arg.check_value("three").is_err());
        assert!(arg.check_value("").is_ok());
        assert!(arg.clone().required().check_value("").is_err());

        let arg = Argument::flag("ON", "on").with_type(ArgumentType::Bool);
        assert!(arg.check_value("true").is_ok());
        assert!(arg.check_value("yes").is_err());
    }

    #[test]
    fn test_deserialize_parameter() {
        let yaml = "envKey: TOKEN\nsecretRef: api-token\n";
        let param: Parameter = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(param.source(), ParameterSource::Secret("api-token"));
    }
}
