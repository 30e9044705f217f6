//! Collaborators used by the runners
//!
//! Each concern sits behind a trait so runners can be driven by test doubles:
//! - `shell`: command and script execution
//! - `open`: opening URIs and applications
//! - `rest`: HTTP requests
//! - `expr`: expression evaluation for conditions and transforms
//! - `vault`: secret lookup
//! - `view`: interactive display and confirmation

pub mod expr;
pub mod open;
pub mod rest;
pub mod shell;
pub mod vault;
pub mod view;

pub use expr::{ExprEvaluator, ExpressionData, JinjaEvaluator};
pub use open::{Opener, SystemOpener};
pub use rest::{HttpRestClient, Request, Response, RestClient};
pub use vault::{EnvVault, MemoryVault, SecretValue, Vault};
pub use view::{InteractiveView, TerminalView};
