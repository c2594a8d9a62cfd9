//! Error types for the Parley domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `AgentError` is the
//! taxonomy of failures the step executor recovers from (or, for the
//! iteration budget, reports) without ever letting them escape.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all Parley operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- LLM errors ---
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    // --- Mailbox errors ---
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Agent errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("LLM not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Empty completion")]
    EmptyCompletion,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MailboxError {
    #[error("User {0} is not registered")]
    UnregisteredUser(String),

    #[error("User {user_id} is not a member of chat group {group_id}")]
    NotGroupMember { user_id: String, group_id: String },

    #[error("User {0} already has a task in flight")]
    AlreadyChatting(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt record in {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool panicked: {0}")]
    Panicked(String),
}

/// Failures inside one task's reasoning loop.
///
/// Every variant except `IterationBudgetExceeded` is recovered locally by
/// turning its message into an observation for the next reasoning round.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentError {
    #[error("Could not parse the reasoning output: {reason}")]
    ReasoningParse { reason: String, raw: String },

    #[error(
        "Tool `{name}` does not exist. Choose one of the available tools: {available}"
    )]
    UnknownTool { name: String, available: String },

    #[error("Tool `{tool_name}` failed: {reason}")]
    ToolExecution { tool_name: String, reason: String },

    #[error("The user aborted the operation `{operation}`")]
    AuthorizationAbort { operation: String },

    #[error("The user {user_id} did not reply within {timeout_secs}s")]
    MailboxTimeout { user_id: String, timeout_secs: u64 },

    #[error("Reached the maximum of {max_iterations} reasoning iterations without an answer")]
    IterationBudgetExceeded { max_iterations: u32 },
}

impl AgentError {
    /// Only an exhausted iteration budget ends a task without a `Done` step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::IterationBudgetExceeded { .. })
    }
}
