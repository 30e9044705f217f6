//! Verbs and executable references

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::RunnerError;

/// Matches any workspace or namespace.
pub const WILDCARD: &str = "*";

const VERB_GROUPS: &[(&str, &[&str])] = &[
    ("activate", &["activate", "enable", "start", "trigger"]),
    ("execute", &["exec", "run", "execute"]),
    ("deactivate", &["deactivate", "disable", "stop", "pause"]),
    ("terminate", &["kill", "terminate", "abort"]),
    ("monitor", &["watch", "monitor", "track"]),
    ("restart", &["restart", "reboot", "reload", "refresh"]),
    ("install", &["install", "setup", "deploy"]),
    ("build", &["build", "package", "bundle", "compile"]),
    ("uninstall", &["uninstall", "teardown", "undeploy"]),
    ("update", &["update", "upgrade", "patch"]),
    ("publish", &["publish", "release"]),
    ("distribute", &["push", "send", "apply"]),
    ("test", &["test", "validate", "check", "verify"]),
    ("analyze", &["analyze", "scan", "lint", "inspect"]),
    ("launch", &["open", "launch", "show", "view"]),
    ("create", &["create", "generate", "add", "new", "init"]),
    ("edit", &["edit", "modify", "fix", "transform"]),
    ("set", &["set"]),
    ("destroy", &["remove", "delete", "destroy", "erase"]),
    ("unset", &["unset", "reset"]),
    ("cleanup", &["clean", "clear", "purge", "tidy"]),
    ("retrieve", &["retrieve", "fetch", "get", "request"]),
    ("debug", &["debug", "trace", "profile"]),
];

static VERB_TO_GROUP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    VERB_GROUPS
        .iter()
        .flat_map(|(group, verbs)| verbs.iter().map(move |verb| (*verb, *group)))
        .collect()
});

/// Action word of an executable. Verbs in the same group are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Verb(String);

impl Verb {
    pub fn new(verb: impl Into<String>) -> Self {
        Self(verb.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn group(&self) -> Option<&'static str> {
        VERB_TO_GROUP.get(self.0.as_str()).copied()
    }

    pub fn validate(&self) -> Result<(), RunnerError> {
        match self.group() {
            Some(_) => Ok(()),
            None => Err(RunnerError::Validation(format!(
                "invalid executable verb {}",
                self.0
            ))),
        }
    }

    pub fn equals(&self, other: &Verb) -> bool {
        match (self.group(), other.group()) {
            (Some(a), Some(b)) => a == b,
            _ => self.0 == other.0,
        }
    }

    /// All verbs sharing this verb's group, sorted.
    pub fn related(&self) -> Vec<&'static str> {
        let Some(group) = self.group() else {
            return Vec::new();
        };
        let mut verbs: Vec<&'static str> = VERB_TO_GROUP
            .iter()
            .filter(|(_, g)| **g == group)
            .map(|(verb, _)| *verb)
            .collect();
        verbs.sort_unstable();
        verbs
    }
}

impl Default for Verb {
    fn default() -> Self {
        Self("exec".to_string())
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn specific(part: &str) -> Option<String> {
    if part.is_empty() || part == WILDCARD {
        None
    } else {
        Some(part.to_string())
    }
}

/// Format an executable ID: `ws/ns:name`, `ws/name`, `ns:name` or `name`.
pub fn executable_id(workspace: Option<&str>, namespace: Option<&str>, name: &str) -> String {
    match (workspace, namespace) {
        (Some(ws), Some(ns)) => format!("{}/{}:{}", ws, ns, name),
        (Some(ws), None) => format!("{}/{}", ws, name),
        (None, Some(ns)) => format!("{}:{}", ns, name),
        (None, None) => name.to_string(),
    }
}

/// Split an executable ID into workspace, namespace and name.
pub fn parse_executable_id(id: &str) -> (Option<String>, Option<String>, String) {
    let (workspace, rest) = match id.split_once('/') {
        Some((ws, rest)) => (specific(ws), rest),
        None => (None, id),
    };
    let (namespace, name) = match rest.split_once(':') {
        Some((ns, name)) => (specific(ns), name),
        None => (None, rest),
    };
    (workspace, namespace, name.to_string())
}

/// Reference to an executable: `<verb> [<ws>/][<ns>:]<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ref {
    pub verb: Verb,
    pub workspace: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
}

impl Ref {
    pub fn new(verb: Verb, id: &str) -> Self {
        let (workspace, namespace, name) = parse_executable_id(id);
        Self {
            verb,
            workspace,
            namespace,
            name,
        }
    }

    pub fn id(&self) -> String {
        executable_id(
            self.workspace.as_deref(),
            self.namespace.as_deref(),
            &self.name,
        )
    }

    /// Same verb group and the same ID.
    pub fn matches(&self, other: &Ref) -> bool {
        self.verb.equals(&other.verb) && self.id() == other.id()
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.id();
        if id.is_empty() {
            write!(f, "{}", self.verb)
        } else {
            write!(f, "{} {}", self.verb, id)
        }
    }
}

impl FromStr for Ref {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RunnerError::Validation("empty executable reference".into()));
        }
        let (verb, id) = match s.split_once(' ') {
            Some((verb, id)) => (verb, id.trim()),
            None => (s, ""),
        };
        let verb = Verb::new(verb);
        verb.validate()?;
        Ok(Ref::new(verb, id))
    }
}

impl TryFrom<String> for Ref {
    type Error = RunnerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ref> for String {
    fn from(value: Ref) -> Self {
        value.to_string()
    }
}
