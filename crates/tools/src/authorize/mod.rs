//! Consent-gated operations.
//!
//! Some tools change the world on the user's behalf (record an entry, book
//! an instrument). They run through an [`OperationAuthorizer`]:
//!
//! ```text
//! COLLECT ──▶ DESCRIBE ──▶ CONFIRM ──▶ EXECUTE
//!    │                        │
//!    └──── decline ───────────┴──────▶ ABORT
//! ```
//!
//! COLLECT asks the user for any required field the agent did not supply,
//! DESCRIBE renders what is about to happen, CONFIRM waits for a yes/no,
//! and only an explicit agreement reaches EXECUTE. Everything that is not a
//! clear yes, including timeouts and unparseable classifier output, aborts.

pub mod authorizer;
pub mod collect;
pub mod tool;
pub mod verdict;

pub use authorizer::{AuthorizerSettings, OperationAuthorizer};
pub use tool::CollectAndAuthorizeTool;

use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::ToolContext;
use parley_core::tool_log::SystemLog;
use serde::{Deserialize, Serialize};

/// Collected parameters, keyed by field name.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// A parameter the operation cannot run without.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// What an executed operation reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationResult {
    pub output: String,
    pub log_to_user: Option<String>,
    pub references: Vec<String>,
}

/// The end state of one authorization run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub output: String,
    pub log_to_user: Option<String>,
    pub log_to_system: SystemLog,
    pub aborted: bool,
    /// Parameters as they stood when the run ended.
    #[serde(default)]
    pub params: Params,
}

/// States of the authorization flow, for logging and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Collect,
    Describe,
    Confirm,
    Execute,
    Abort,
}

impl std::fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthPhase::Collect => "COLLECT",
            AuthPhase::Describe => "DESCRIBE",
            AuthPhase::Confirm => "CONFIRM",
            AuthPhase::Execute => "EXECUTE",
            AuthPhase::Abort => "ABORT",
        };
        f.write_str(s)
    }
}

/// An operation that must not run without the user's consent.
#[async_trait]
pub trait GatedOperation: Send + Sync {
    fn name(&self) -> &str;

    /// Shown to the agent as the tool description.
    fn description(&self) -> &str;

    /// Fields that must be present before DESCRIBE.
    fn required_fields(&self) -> Vec<FieldSpec>;

    /// Human-readable summary of what EXECUTE will do with `params`.
    fn describe(&self, params: &Params) -> String;

    /// Perform the operation.
    fn execute(&self, params: &Params, ctx: &ToolContext) -> Result<OperationResult, ToolError>;

    /// Async counterpart of [`execute`](Self::execute).
    async fn aexecute(
        &self,
        params: &Params,
        ctx: &ToolContext,
    ) -> Result<OperationResult, ToolError> {
        self.execute(params, ctx)
    }
}
