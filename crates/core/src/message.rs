//! Message domain type.
//!
//! A `Message` is both what the LLM sees in its chat history and what gets
//! committed to long-term memory when a task finishes. Each message is
//! stamped with the local date and time at which it was created.

use chrono::{Local, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions and per-turn context
    System,
    /// A log emitted by a tool during the task
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Local date the message was created
    pub date: NaiveDate,

    /// Local time the message was created (second precision)
    pub time: NaiveTime,
}

impl Message {
    /// Create a message stamped with the current local date and time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let now = Local::now().naive_local();
        Self {
            role,
            content: content.into(),
            date: now.date(),
            time: now.time().with_nanosecond(0).unwrap_or(now.time()),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a tool-log message.
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}
