//! Task and Step — the unit of work and its quanta.

use parley_core::error::AgentError;
use parley_core::message::Message;
use parley_core::reasoning::ReasoningStep;
use parley_core::tool::{ToolContext, ToolOutput};
use parley_core::tool_log::ToolLog;
use parley_mailbox::SessionConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mutable state of one task. Only the step executor writes to it.
#[derive(Debug, Clone, Default)]
pub struct TaskState {
    pub user_id: String,
    pub chat_group_id: Option<String>,
    /// System annotation that came with the user's message.
    pub system_msg: String,
    pub enable_instruct: bool,
    pub enable_comment: bool,
    pub reply_in_speech: bool,
    /// Append-only reasoning trace.
    pub reasoning: Vec<ReasoningStep>,
    /// Every tool output, untruncated.
    pub sources: Vec<ToolOutput>,
    /// Messages produced by this task, not yet in long-term memory.
    pub new_memory: Vec<Message>,
    pub tool_logs: Vec<ToolLog>,
    /// Completed REASON/ACT/OBSERVE cycles.
    pub iterations: u32,
}

impl TaskState {
    pub fn new(user_id: impl Into<String>, system_msg: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            system_msg: system_msg.into(),
            ..Self::default()
        }
    }

    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.chat_group_id = Some(group_id.into());
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.apply_session(session);
        self
    }

    /// Overwrite the live flags, e.g. after a mailbox wait.
    pub fn apply_session(&mut self, session: SessionConfig) {
        self.enable_instruct = session.enable_instruct;
        self.enable_comment = session.enable_comment;
        self.reply_in_speech = session.reply_in_speech;
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            user_id: self.user_id.clone(),
            chat_group_id: self.chat_group_id.clone(),
        }
    }
}

/// One end-to-end user request.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub input: String,
    /// Long-term memory key the history was read from.
    pub memory_key: Option<String>,
    /// Long-term history snapshot taken at creation.
    pub history: Vec<Message>,
    pub state: TaskState,
}

impl Task {
    pub fn new(input: impl Into<String>, state: TaskState) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            input: input.into(),
            memory_key: None,
            history: Vec::new(),
            state,
        }
    }

    pub fn with_history(mut self, key: impl Into<String>, history: Vec<Message>) -> Self {
        self.memory_key = Some(key.into());
        self.history = history;
        self
    }

    /// The step that carries the user's request.
    pub fn initial_step(&self) -> Step {
        Step {
            task_id: self.id.clone(),
            step_id: Uuid::new_v4().to_string(),
            input: Some(self.input.clone()),
            is_first: true,
            user_id: self.state.user_id.clone(),
            system_msg: self.state.system_msg.clone(),
        }
    }

    /// A follow-up step, optionally carrying a user comment.
    pub fn next_step(&self, input: Option<String>) -> Step {
        Step {
            task_id: self.id.clone(),
            step_id: Uuid::new_v4().to_string(),
            input,
            is_first: false,
            user_id: self.state.user_id.clone(),
            system_msg: self.state.system_msg.clone(),
        }
    }

    /// Long-term history followed by this task's new messages.
    pub fn chat_history(&self) -> Vec<Message> {
        let mut all = Vec::with_capacity(self.history.len() + self.state.new_memory.len());
        all.extend(self.history.iter().cloned());
        all.extend(self.state.new_memory.iter().cloned());
        all
    }
}

/// One quantum of input to the executor. Consumed by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub task_id: String,
    pub step_id: String,
    pub input: Option<String>,
    pub is_first: bool,
    pub user_id: String,
    pub system_msg: String,
}

/// What a finished task hands back to the caller. Always well-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub task_id: String,
    pub response: String,
    #[serde(default)]
    pub references: Vec<String>,
    /// Set when the task ended without an answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentError>,
    pub iterations: u32,
    #[serde(default)]
    pub reply_in_speech: bool,
}

impl AgentResponse {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}
