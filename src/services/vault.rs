//! Secret lookup

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

use crate::error::RunnerError;

static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());

/// Environment variable prefix read by [`EnvVault`].
pub const SECRET_ENV_PREFIX: &str = "FLOW_SECRET_";

pub fn validate_reference(reference: &str) -> Result<(), RunnerError> {
    if reference.is_empty() {
        return Err(RunnerError::Secret("secret reference cannot be empty".to_string()));
    }
    if !REFERENCE_RE.is_match(reference) {
        return Err(RunnerError::Secret(format!(
            "invalid secret reference {:?}: only alphanumerics, '-' and '_' are allowed",
            reference
        )));
    }
    Ok(())
}

/// Secret value that never shows up in debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(********)")
    }
}

pub trait Vault: Send + Sync {
    fn get_secret(&self, reference: &str) -> Result<SecretValue, RunnerError>;
}

/// Reads `FLOW_SECRET_<REFERENCE>` with the reference upper-cased and `-` mapped to `_`.
#[derive(Debug, Clone, Default)]
pub struct EnvVault;

impl EnvVault {
    pub fn new() -> Self {
        Self
    }

    pub fn env_key(reference: &str) -> String {
        format!("{}{}", SECRET_ENV_PREFIX, reference.to_uppercase().replace('-', "_"))
    }
}

impl Vault for EnvVault {
    fn get_secret(&self, reference: &str) -> Result<SecretValue, RunnerError> {
        std::env::var(Self::env_key(reference))
            .map(SecretValue)
            .map_err(|_| RunnerError::Secret(format!("secret {} not found", reference)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryVault {
    secrets: HashMap<String, SecretValue>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, reference: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(reference.into(), SecretValue::new(value));
        self
    }
}

impl Vault for MemoryVault {
    fn get_secret(&self, reference: &str) -> Result<SecretValue, RunnerError> {
        self.secrets
            .get(reference)
            .cloned()
            .ok_or_else(|| RunnerError::Secret(format!("secret {} not found", reference)))
    }
}
