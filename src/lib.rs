//! Flow runner - executes workspace-defined executables
//!
//! Executables are declared in `*.flow` YAML files and run through a
//! registry of runners:
//! - `exec`: shell commands and scripts
//! - `launch`: URIs and applications
//! - `request`: HTTP requests with response transforms
//! - `render`: markdown templates shown in the interactive view
//! - `serial` / `parallel`: composites driving the execution engine, with
//!   retries, fail-fast and bounded concurrency

pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod env;
pub mod error;
pub mod runner;
pub mod services;
pub mod types;

pub use cache::{ExecutableCache, ExecutableLookup};
pub use config::Config;
pub use context::RunContext;
pub use engine::{Engine, Exec, ExecEngine, ExecResult, ExecutionMode, Options, ResultSummary};
pub use error::{Result, RunnerError};
pub use runner::{Dispatcher, Runner, RunnerRegistry, Services};
pub use types::{EnvMap, Executable, Ref, Verb};
