//! Tool logs — what a tool wants the user and the system to remember.
//!
//! A tool may attach a `ToolLog` to its output. The executor collects these
//! per task: `log_to_user` is appended to the final answer, while
//! `log_to_system` is injected into the short-term history as a TOOL message
//! and its references are returned alongside the answer.

use serde::{Deserialize, Serialize};

/// The part of a tool log addressed to the agent itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemLog {
    /// What the tool did, in plain words.
    pub description: String,
    /// Paths or identifiers of material the tool relied on.
    #[serde(default)]
    pub references: Vec<String>,
}

/// A structured record emitted by a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolLog {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_to_user: Option<String>,
    pub log_to_system: SystemLog,
    /// True when the user declined a gated operation.
    #[serde(default)]
    pub abort: bool,
}

impl ToolLog {
    pub fn new(tool_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            log_to_user: None,
            log_to_system: SystemLog {
                description: description.into(),
                references: Vec::new(),
            },
            abort: false,
        }
    }

    pub fn with_log_to_user(mut self, text: impl Into<String>) -> Self {
        self.log_to_user = Some(text.into());
        self
    }

    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.log_to_system.references = references;
        self
    }

    pub fn aborted(mut self) -> Self {
        self.abort = true;
        self
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON string produced by [`ToolLog::to_json`].
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Render the system-facing part for the reasoning history.
    pub fn render_for_system(&self) -> String {
        let mut out = self.log_to_system.description.clone();
        if !self.log_to_system.references.is_empty() {
            out.push_str("\nReferences:\n");
            out.push_str(&self.log_to_system.references.join("\n"));
        }
        out
    }
}
