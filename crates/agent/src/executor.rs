//! StepExecutor — drives one task through its steps to an answer.
//!
//! ```text
//! INIT → REASON → (INSTRUCT_WAIT)? → ACT → OBSERVE ─┬─▶ DONE
//!          ▲                                          │
//!          └────────── LOOP / COMMENT_WAIT ◀──────────┘
//! ```
//!
//! `execute` blocks on the LLM, tools, and mailbox; `aexecute` awaits
//! them. Both go through the same helpers, so for the same completions
//! and replies they append the same reasoning steps.
//!
//! Nothing escapes: parse failures, unknown tools, tool errors and panics,
//! LLM failures, and mailbox timeouts all become observations. Running out
//! of iterations yields an [`AgentResponse`] carrying the error.

use crate::formatter::{ReActFormatter, ReasoningFormatter};
use crate::parser;
use crate::task::{AgentResponse, Step, Task};
use futures::FutureExt;
use parley_config::AgentSettings;
use parley_core::error::{AgentError, LlmError, ToolError};
use parley_core::event::{AgentEvent, EventBus};
use parley_core::llm::{Llm, LlmResponse};
use parley_core::message::Message;
use parley_core::reasoning::{ObservationSource, ReasoningStep};
use parley_core::tool::{Tool, ToolMetadata, ToolOutput, ToolRegistry};
use parley_mailbox::{Mailbox, MailboxMessage};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Limits and wait bounds for one executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub max_iterations: u32,
    pub mailbox_timeout: Duration,
    pub instruct_timeout: Duration,
    /// 0 disables truncation.
    pub observation_max_chars: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            mailbox_timeout: Duration::from_secs(240),
            instruct_timeout: Duration::from_secs(240),
            observation_max_chars: 8000,
        }
    }
}

impl From<&AgentSettings> for ExecutorSettings {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            mailbox_timeout: Duration::from_secs(settings.mailbox_timeout_seconds),
            instruct_timeout: Duration::from_secs(settings.instruct_timeout()),
            observation_max_chars: settings.observation_max_chars,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Init,
    Reason,
    InstructWait,
    Act,
    Observe,
    CommentWait,
    Done,
}

impl std::fmt::Display for ExecState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExecState::Init => "INIT",
            ExecState::Reason => "REASON",
            ExecState::InstructWait => "INSTRUCT_WAIT",
            ExecState::Act => "ACT",
            ExecState::Observe => "OBSERVE",
            ExecState::CommentWait => "COMMENT_WAIT",
            ExecState::Done => "DONE",
        })
    }
}

/// What one step produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    /// The task has its answer.
    pub is_last: bool,
    /// The answer, or the observation shown to the user at COMMENT_WAIT.
    pub text: String,
}

/// Decision taken at ACT.
enum Plan<'a> {
    Finish(String),
    Invoke {
        tool: &'a dyn Tool,
        args: serde_json::Value,
    },
    /// Parse failure or unknown tool, already rendered as a tool output.
    Fallback(ToolOutput),
}

/// Cap `text` at `max_chars` characters, noting how much was cut.
pub fn truncate_observation(text: String, max_chars: usize) -> String {
    if max_chars == 0 {
        return text;
    }
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    format!("{}\n...[truncated {} chars]", &text[..cut], total - max_chars)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

pub struct StepExecutor {
    llm: Arc<dyn Llm>,
    tools: Arc<ToolRegistry>,
    formatter: Arc<dyn ReasoningFormatter>,
    mailbox: Arc<Mailbox>,
    settings: ExecutorSettings,
    events: Option<Arc<EventBus>>,
}

impl StepExecutor {
    pub fn new(llm: Arc<dyn Llm>, tools: Arc<ToolRegistry>, mailbox: Arc<Mailbox>) -> Self {
        Self {
            llm,
            tools,
            formatter: Arc::new(ReActFormatter::new()),
            mailbox,
            settings: ExecutorSettings::default(),
            events: None,
        }
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn ReasoningFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    pub(crate) fn events(&self) -> Option<&Arc<EventBus>> {
        self.events.as_ref()
    }

    fn transition(&self, task: &Task, state: ExecState) {
        debug!(task_id = %task.id, state = %state, iteration = task.state.iterations, "Step transition");
        if let Some(events) = &self.events {
            events.publish(AgentEvent::StepTransition {
                task_id: task.id.clone(),
                state: state.to_string(),
                iteration: task.state.iterations,
            });
        }
    }

    // ── INIT ──

    fn init(&self, task: &mut Task, step: Step) {
        self.transition(task, ExecState::Init);
        let Some(input) = step.input else {
            return;
        };
        if step.is_first {
            if !step.system_msg.is_empty() {
                task.state.new_memory.push(Message::system(step.system_msg));
            }
            task.state.new_memory.push(Message::user(input));
        } else {
            task.state.reasoning.push(ReasoningStep::from_user(input));
        }
    }

    // ── REASON ──

    fn begin_reason(&self, task: &mut Task) -> Vec<Message> {
        task.state.iterations += 1;
        self.transition(task, ExecState::Reason);
        self.formatter.format(
            &self.tools.metadata(),
            &task.chat_history(),
            &task.state.reasoning,
        )
    }

    /// A failed LLM call ends the step with an observation.
    fn completion(
        &self,
        task: &mut Task,
        result: Result<LlmResponse, LlmError>,
    ) -> Result<String, StepOutput> {
        match result {
            Ok(response) => Ok(response.content),
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "LLM call failed");
                let text = format!("Error: the language model call failed: {e}");
                task.state
                    .reasoning
                    .push(ReasoningStep::from_system(text.clone()));
                Err(StepOutput {
                    is_last: false,
                    text,
                })
            }
        }
    }

    // ── INSTRUCT_WAIT ──

    fn instruct_query(completion: &str) -> String {
        format!(
            "Current thought:\n{completion}\n\n\
             Please guide my reasoning. I will adjust my decision according to your suggestion."
        )
    }

    fn begin_instruct(&self, task: &Task, completion: &str) {
        self.transition(task, ExecState::InstructWait);
        self.mailbox.put_agent_reply(
            &task.state.user_id,
            &Self::instruct_query(completion),
            Vec::new(),
            true,
        );
    }

    /// Record the user's instruction and build the revision prompt. `None`
    /// when the wait timed out; the original completion then stands.
    fn absorb_instruct(
        &self,
        task: &mut Task,
        completion: &str,
        reply: MailboxMessage,
    ) -> Option<Vec<Message>> {
        task.state
            .apply_session(self.mailbox.session(&task.state.user_id));
        if reply.timed_out {
            let err = AgentError::MailboxTimeout {
                user_id: task.state.user_id.clone(),
                timeout_secs: self.settings.instruct_timeout.as_secs(),
            };
            warn!(task_id = %task.id, error = %err, "No instruction, keeping the original completion");
            return None;
        }
        let suggestion = format!("User's suggestion: {}", reply.user_msg);
        task.state.reasoning.push(ReasoningStep::from_system(format!(
            "<system>:{}",
            reply.system_msg
        )));
        task.state
            .reasoning
            .push(ReasoningStep::from_user(suggestion.clone()));
        Some(self.formatter.format_instruct(
            &self.tools.metadata(),
            &task.chat_history(),
            &task.state.reasoning,
            completion,
            &suggestion,
        ))
    }

    fn revised(task: &Task, original: String, result: Result<LlmResponse, LlmError>) -> String {
        match result {
            Ok(response) => response.content,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Revision call failed, keeping the original completion");
                original
            }
        }
    }

    // ── ACT ──

    fn plan(&self, task: &mut Task, completion: &str) -> Plan<'_> {
        self.transition(task, ExecState::Act);
        match parser::parse(completion) {
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Could not parse completion");
                Plan::Fallback(ToolOutput::error(
                    "",
                    serde_json::Value::Null,
                    format!(
                        "{e}. Please follow the Thought/Action/Action Input format and try again."
                    ),
                ))
            }
            Ok(ReasoningStep::Done { thought, answer }) => {
                task.state.reasoning.push(ReasoningStep::Done {
                    thought,
                    answer: answer.clone(),
                });
                Plan::Finish(answer)
            }
            Ok(ReasoningStep::ThoughtAction {
                thought,
                tool_name,
                args,
            }) => {
                task.state.reasoning.push(ReasoningStep::ThoughtAction {
                    thought,
                    tool_name: tool_name.clone(),
                    args: args.clone(),
                });
                match self.tools.resolve(&tool_name) {
                    Ok(tool) => Plan::Invoke { tool, args },
                    Err(_) => {
                        let err = AgentError::UnknownTool {
                            name: tool_name.clone(),
                            available: self.tools.names().join(", "),
                        };
                        warn!(task_id = %task.id, error = %err, "Unknown tool");
                        Plan::Fallback(ToolOutput::error(tool_name, args, err))
                    }
                }
            }
            Ok(ReasoningStep::Observation { text, .. }) => {
                Plan::Fallback(ToolOutput::text("", serde_json::Value::Null, text))
            }
        }
    }

    /// Turn a tool failure or panic into an error output.
    fn isolate(
        name: &str,
        args: serde_json::Value,
        result: std::thread::Result<Result<ToolOutput, ToolError>>,
    ) -> ToolOutput {
        let reason = match result {
            Ok(Ok(output)) => return output,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload),
        };
        let err = AgentError::ToolExecution {
            tool_name: name.to_string(),
            reason,
        };
        warn!(tool = name, error = %err, "Tool failed");
        ToolOutput::error(name, args, err)
    }

    fn invoke(&self, task: &Task, tool: &dyn Tool, name: &str, args: serde_json::Value) -> ToolOutput {
        let ctx = task.state.tool_context();
        let result = catch_unwind(AssertUnwindSafe(|| tool.call(args.clone(), &ctx)));
        Self::isolate(name, args, result)
    }

    async fn ainvoke(
        &self,
        task: &Task,
        tool: &dyn Tool,
        name: &str,
        args: serde_json::Value,
    ) -> ToolOutput {
        let ctx = task.state.tool_context();
        let result = AssertUnwindSafe(tool.acall(args.clone(), &ctx))
            .catch_unwind()
            .await;
        Self::isolate(name, args, result)
    }

    // ── OBSERVE ──

    fn observe(
        &self,
        task: &mut Task,
        meta: Option<&ToolMetadata>,
        output: ToolOutput,
        elapsed: Option<Duration>,
    ) -> StepOutput {
        self.transition(task, ExecState::Observe);
        if let (Some(meta), Some(elapsed), Some(events)) = (meta, elapsed, &self.events) {
            events.publish(AgentEvent::ToolExecuted {
                task_id: task.id.clone(),
                tool_name: meta.name.clone(),
                is_error: output.is_error,
                duration_ms: elapsed.as_millis() as u64,
            });
        }

        let (text, log) = output.split();
        let return_direct = meta.is_some_and(|m| m.return_direct) && !output.is_error;

        if let Some(log) = &log {
            task.state
                .new_memory
                .push(Message::tool(log.render_for_system()));
            task.state.tool_logs.push(log.clone());
        }

        let observation = if return_direct {
            text
        } else {
            let body = match &log {
                Some(log) => format!(
                    "Tool output:\n{text}\nTool logs:\n{}",
                    log.render_for_system()
                ),
                None => format!("Tool output:\n{text}"),
            };
            truncate_observation(body, self.settings.observation_max_chars)
        };

        // Fallbacks with no action before them are engine notes.
        let source = match task.state.reasoning.last() {
            Some(ReasoningStep::ThoughtAction { .. }) => ObservationSource::Tool,
            _ => ObservationSource::System,
        };
        task.state.sources.push(output);
        task.state.reasoning.push(ReasoningStep::Observation {
            text: observation.clone(),
            return_direct,
            source,
        });
        if return_direct {
            task.state.reasoning.push(ReasoningStep::Done {
                thought: "The tool output is the answer.".to_string(),
                answer: observation.clone(),
            });
        }
        StepOutput {
            is_last: return_direct,
            text: observation,
        }
    }

    // ── COMMENT_WAIT ──

    fn begin_comment(&self, task: &Task, observation: &str) {
        self.transition(task, ExecState::CommentWait);
        self.mailbox
            .put_agent_reply(&task.state.user_id, observation, Vec::new(), true);
    }

    /// The next step's input for a comment reply (or its timeout sentinel).
    fn absorb_comment(&self, task: &mut Task, reply: MailboxMessage) -> String {
        task.state
            .apply_session(self.mailbox.session(&task.state.user_id));
        if reply.timed_out {
            let err = AgentError::MailboxTimeout {
                user_id: task.state.user_id.clone(),
                timeout_secs: self.settings.mailbox_timeout.as_secs(),
            };
            warn!(task_id = %task.id, error = %err, "No comment, continuing");
        }
        format!("User's suggestion: {}", reply.user_msg)
    }

    // ── DONE ──

    fn references(task: &Task) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();
        for r in task
            .state
            .tool_logs
            .iter()
            .flat_map(|l| l.log_to_system.references.iter())
        {
            if !refs.contains(r) {
                refs.push(r.clone());
            }
        }
        refs
    }

    fn finish(&self, task: &mut Task) -> AgentResponse {
        self.transition(task, ExecState::Done);
        let answer = match task.state.reasoning.last() {
            Some(ReasoningStep::Done { answer, .. }) => answer.clone(),
            _ => String::new(),
        };
        task.state.new_memory.push(Message::assistant(answer.clone()));

        let to_user: Vec<&str> = task
            .state
            .tool_logs
            .iter()
            .filter_map(|l| l.log_to_user.as_deref())
            .filter(|s| !s.trim().is_empty())
            .collect();
        let response = if to_user.is_empty() {
            answer
        } else {
            format!("{answer}\n\n{}", to_user.join("\n"))
        };

        AgentResponse {
            task_id: task.id.clone(),
            response,
            references: Self::references(task),
            error: None,
            iterations: task.state.iterations,
            reply_in_speech: task.state.reply_in_speech,
        }
    }

    /// Checked before every step and before a comment wait, so a spent
    /// budget never blocks on the mailbox or consumes a user message.
    fn budget_spent(&self, task: &Task) -> bool {
        task.state.iterations >= self.settings.max_iterations
    }

    fn exhausted(&self, task: &mut Task) -> AgentResponse {
        let err = AgentError::IterationBudgetExceeded {
            max_iterations: self.settings.max_iterations,
        };
        warn!(task_id = %task.id, error = %err, "Task stopped without an answer");
        let response = format!("Sorry, I could not finish this request. {err}.");
        task.state
            .new_memory
            .push(Message::assistant(response.clone()));
        AgentResponse {
            task_id: task.id.clone(),
            response,
            references: Self::references(task),
            error: Some(err),
            iterations: task.state.iterations,
            reply_in_speech: task.state.reply_in_speech,
        }
    }

    // ── Blocking driver ──

    /// One REASON/ACT/OBSERVE cycle.
    pub fn run_step(&self, task: &mut Task, step: Step) -> StepOutput {
        self.init(task, step);
        let prompt = self.begin_reason(task);
        let completion = match self.completion(task, self.llm.chat(&prompt)) {
            Ok(c) => c,
            Err(output) => return output,
        };

        let completion = if task.state.enable_instruct {
            self.begin_instruct(task, &completion);
            let reply = self
                .mailbox
                .get_user_message(&task.state.user_id, self.settings.instruct_timeout);
            match self.absorb_instruct(task, &completion, reply) {
                Some(prompt) => Self::revised(task, completion, self.llm.chat(&prompt)),
                None => completion,
            }
        } else {
            completion
        };

        match self.plan(task, &completion) {
            Plan::Finish(answer) => StepOutput {
                is_last: true,
                text: answer,
            },
            Plan::Fallback(output) => self.observe(task, None, output, None),
            Plan::Invoke { tool, args } => {
                let meta = tool.metadata();
                let started = Instant::now();
                let output = self.invoke(task, tool, &meta.name, args);
                self.observe(task, Some(&meta), output, Some(started.elapsed()))
            }
        }
    }

    /// Drive the task until it has an answer or runs out of iterations.
    pub fn execute(&self, task: &mut Task) -> AgentResponse {
        let mut step = task.initial_step();
        loop {
            if self.budget_spent(task) {
                return self.exhausted(task);
            }
            let output = self.run_step(task, step);
            if output.is_last {
                return self.finish(task);
            }
            if self.budget_spent(task) {
                return self.exhausted(task);
            }
            let comment = if task.state.enable_comment {
                self.begin_comment(task, &output.text);
                let reply = self
                    .mailbox
                    .get_user_message(&task.state.user_id, self.settings.mailbox_timeout);
                Some(self.absorb_comment(task, reply))
            } else {
                None
            };
            step = task.next_step(comment);
        }
    }

    // ── Async driver ──

    pub async fn arun_step(&self, task: &mut Task, step: Step) -> StepOutput {
        self.init(task, step);
        let prompt = self.begin_reason(task);
        let completion = match self.completion(task, self.llm.achat(&prompt).await) {
            Ok(c) => c,
            Err(output) => return output,
        };

        let completion = if task.state.enable_instruct {
            self.begin_instruct(task, &completion);
            let reply = self
                .mailbox
                .aget_user_message(&task.state.user_id, self.settings.instruct_timeout)
                .await;
            match self.absorb_instruct(task, &completion, reply) {
                Some(prompt) => Self::revised(task, completion, self.llm.achat(&prompt).await),
                None => completion,
            }
        } else {
            completion
        };

        match self.plan(task, &completion) {
            Plan::Finish(answer) => StepOutput {
                is_last: true,
                text: answer,
            },
            Plan::Fallback(output) => self.observe(task, None, output, None),
            Plan::Invoke { tool, args } => {
                let meta = tool.metadata();
                let started = Instant::now();
                let output = self.ainvoke(task, tool, &meta.name, args).await;
                self.observe(task, Some(&meta), output, Some(started.elapsed()))
            }
        }
    }

    pub async fn aexecute(&self, task: &mut Task) -> AgentResponse {
        let mut step = task.initial_step();
        loop {
            if self.budget_spent(task) {
                return self.exhausted(task);
            }
            let output = self.arun_step(task, step).await;
            if output.is_last {
                return self.finish(task);
            }
            if self.budget_spent(task) {
                return self.exhausted(task);
            }
            let comment = if task.state.enable_comment {
                self.begin_comment(task, &output.text);
                let reply = self
                    .mailbox
                    .aget_user_message(&task.state.user_id, self.settings.mailbox_timeout)
                    .await;
                Some(self.absorb_comment(task, reply))
            } else {
                None
            };
            step = task.next_step(comment);
        }
    }
}
