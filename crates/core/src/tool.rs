//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world: ask the
//! user a question, look up the date, perform an operation that needs the
//! user's consent. Each tool exposes a blocking `call` and an async `acall`
//! so that both scheduling models of the agent can drive it.

use crate::error::ToolError;
use crate::tool_log::ToolLog;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Who the tool is acting for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContext {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_group_id: Option<String>,
}

impl ToolContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            chat_group_id: None,
        }
    }
}

/// Static description of a tool, rendered into the reasoning prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    /// The tool's output is the final answer, verbatim.
    #[serde(default)]
    pub return_direct: bool,
}

/// The result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Text handed back to the agent. May be a JSON envelope carrying a log.
    pub content: String,
    pub tool_name: String,
    pub raw_input: serde_json::Value,
    pub raw_output: serde_json::Value,
    #[serde(default)]
    pub is_error: bool,
}

const ENVELOPE_OUTPUT: &str = "tool_output";
const ENVELOPE_LOG: &str = "tool_log";

impl ToolOutput {
    /// A plain-text result without a log.
    pub fn text(
        tool_name: impl Into<String>,
        raw_input: serde_json::Value,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            raw_output: serde_json::Value::String(text.clone()),
            content: text,
            tool_name: tool_name.into(),
            raw_input,
            is_error: false,
        }
    }

    /// A result wrapped in the `{tool_output, tool_log}` envelope.
    pub fn with_log(
        tool_name: impl Into<String>,
        raw_input: serde_json::Value,
        text: impl Into<String>,
        log: &ToolLog,
    ) -> Self {
        let envelope = serde_json::json!({
            ENVELOPE_OUTPUT: text.into(),
            ENVELOPE_LOG: log,
        });
        Self {
            content: envelope.to_string(),
            tool_name: tool_name.into(),
            raw_input,
            raw_output: envelope,
            is_error: false,
        }
    }

    /// A failed invocation rendered for the agent.
    pub fn error(
        tool_name: impl Into<String>,
        raw_input: serde_json::Value,
        error: impl std::fmt::Display,
    ) -> Self {
        let text = format!("Error: {error}");
        Self {
            raw_output: serde_json::Value::String(text.clone()),
            content: text,
            tool_name: tool_name.into(),
            raw_input,
            is_error: true,
        }
    }

    /// Split the content into the output text and the optional log.
    ///
    /// Content that is not an envelope is returned verbatim. A malformed
    /// log inside a well-formed envelope is dropped with a warning.
    pub fn split(&self) -> (String, Option<ToolLog>) {
        let Ok(serde_json::Value::Object(map)) =
            serde_json::from_str::<serde_json::Value>(&self.content)
        else {
            return (self.content.clone(), None);
        };
        let Some(output) = map.get(ENVELOPE_OUTPUT) else {
            return (self.content.clone(), None);
        };
        let text = match output {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let log = match map.get(ENVELOPE_LOG) {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => match serde_json::from_value::<ToolLog>(value.clone()) {
                Ok(log) => Some(log),
                Err(e) => {
                    tracing::warn!(tool = %self.tool_name, error = %e, "Dropping malformed tool log");
                    None
                }
            },
        };
        (text, log)
    }
}

/// The core Tool trait.
///
/// Implementations report failures as `Err(ToolError)`; the executor turns
/// those (and panics) into an error `ToolOutput` so nothing escapes.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description, and `return_direct` flag.
    fn metadata(&self) -> ToolMetadata;

    /// Blocking invocation.
    fn call(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Async invocation. Defaults to the blocking path, which suits tools
    /// that never wait on I/O.
    async fn acall(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError> {
        self.call(args, ctx)
    }
}

/// A registry of available tools, keyed by name.
///
/// Lookups fail closed: an unknown name is an error, never a fallback.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.metadata().name;
        self.tools.insert(name, tool);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, tool: Box<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Resolve a tool by name or report it missing.
    pub fn resolve(&self, name: &str) -> std::result::Result<&dyn Tool, ToolError> {
        self.get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Metadata of every tool, sorted by name for stable prompts.
    pub fn metadata(&self) -> Vec<ToolMetadata> {
        let mut all: Vec<ToolMetadata> = self.tools.values().map(|t| t.metadata()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
