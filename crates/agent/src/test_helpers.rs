//! Shared test helpers for executor and runner tests.

use async_trait::async_trait;
use parley_core::error::{LlmError, ToolError};
use parley_core::llm::{Llm, LlmResponse};
use parley_core::message::Message;
use parley_core::tool::{Tool, ToolContext, ToolMetadata, ToolOutput};
use parley_core::tool_log::ToolLog;
use parley_mailbox::{AccountRegistry, Mailbox};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// An LLM that returns a sequence of scripted completions.
///
/// Panics if more calls are made than completions provided, unless built
/// with [`repeating`](Self::repeating).
pub struct SequentialMockLlm {
    results: Mutex<Vec<Result<String, LlmError>>>,
    repeat: Option<String>,
    prompts: Mutex<Vec<Vec<Message>>>,
    call_count: AtomicUsize,
}

impl SequentialMockLlm {
    pub fn new(completions: Vec<String>) -> Arc<Self> {
        Self::with_results(completions.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results),
            repeat: None,
            prompts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        })
    }

    /// Returns the same completion forever.
    pub fn repeating(completion: String) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(Vec::new()),
            repeat: Some(completion),
            prompts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every prompt seen so far, in call order.
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().unwrap().clone()
    }

    fn next(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        if let Some(text) = &self.repeat {
            return Ok(LlmResponse::new(text.clone()));
        }
        let results = self.results.lock().unwrap();
        match results.get(n) {
            Some(r) => r.clone().map(LlmResponse::new),
            None => panic!(
                "SequentialMockLlm: no more completions (call #{n}, have {})",
                results.len()
            ),
        }
    }
}

#[async_trait]
impl Llm for SequentialMockLlm {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    fn chat(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
        self.next(messages)
    }

    async fn achat(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
        self.next(messages)
    }
}

/// A completion that calls `tool` with a raw Action Input.
pub fn action(tool: &str, input: &str) -> String {
    format!("Thought: I need to use {tool}.\nAction: {tool}\nAction Input: {input}")
}

/// A completion that answers.
pub fn answer(text: &str) -> String {
    format!("Thought: I can answer without using any more tools.\nAnswer: {text}")
}

pub fn mailbox_for(users: &[&str]) -> Arc<Mailbox> {
    let users: Vec<String> = users.iter().map(|u| u.to_string()).collect();
    let accounts = AccountRegistry::from_parts(&users, &HashMap::new());
    Arc::new(Mailbox::new(Arc::new(accounts)))
}

/// Returns fixed text and counts its calls.
pub struct RecordingTool {
    name: String,
    reply: String,
    return_direct: bool,
    pub calls: Arc<AtomicUsize>,
}

impl RecordingTool {
    pub fn new(name: &str, reply: &str) -> Self {
        Self {
            name: name.to_string(),
            reply: reply.to_string(),
            return_direct: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn return_direct(mut self) -> Self {
        self.return_direct = true;
        self
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: self.name.clone(),
            description: format!("Returns {}", self.reply),
            return_direct: self.return_direct,
        }
    }

    fn call(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::text(&self.name, args, &self.reply))
    }
}

/// Always fails.
pub struct FailingTool {
    name: String,
    return_direct: bool,
}

impl FailingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            return_direct: false,
        }
    }

    pub fn return_direct(mut self) -> Self {
        self.return_direct = true;
        self
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: self.name.clone(),
            description: "Always fails".into(),
            return_direct: self.return_direct,
        }
    }

    fn call(&self, _args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: "backend unavailable".into(),
        })
    }
}

pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "explode".into(),
            description: "Panics".into(),
            return_direct: false,
        }
    }

    fn call(&self, _args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        panic!("tool blew up");
    }

    async fn acall(
        &self,
        _args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        panic!("tool blew up in async");
    }
}

/// Attaches a log to its output.
pub struct LoggingTool;

#[async_trait]
impl Tool for LoggingTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "logger".into(),
            description: "Writes a file and logs it".into(),
            return_direct: false,
        }
    }

    fn call(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let log = ToolLog::new("logger", "The tool wrote a file.")
            .with_log_to_user("Saved your file.")
            .with_references(vec!["/data/file.txt".into(), "/data/file.txt".into()]);
        Ok(ToolOutput::with_log("logger", args, "ok", &log))
    }
}
