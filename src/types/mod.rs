//! Executable model: references, parameters, directories and type specs

pub mod directory;
pub mod executable;
pub mod parameter;
pub mod reference;

use std::collections::HashMap;

pub use directory::{expand_directory, expand_env, Directory, TMP_DIR_LABEL};
pub use executable::{
    ChildExec, ExecSpec, Executable, HttpMethod, LaunchSpec, ParallelSpec, RenderSpec,
    RequestSpec, ResponseFile, SaveAs, SerialSpec,
};
pub use parameter::{Argument, ArgumentType, Parameter, ParameterSource};
pub use reference::{Ref, Verb};

/// Resolved environment variables keyed by name.
pub type EnvMap = HashMap<String, String>;

/// Optional humantime duration (`30s`, `5m`, `1h 30m`).
pub(crate) mod serde_duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.filter(|s| !s.trim().is_empty())
            .map(|s| humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom))
            .transpose()
    }
}
