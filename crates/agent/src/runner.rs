//! TaskRunner — owns a task's lifecycle: create, run, finalize.
//!
//! Long-term memory is written in exactly one place, [`TaskRunner::finalize`].
//! A task dropped before finalize commits nothing.

use crate::executor::StepExecutor;
use crate::task::{AgentResponse, Task, TaskState};
use chrono::Utc;
use parley_core::error::{MailboxError, MemoryError};
use parley_core::event::AgentEvent;
use parley_core::memory::LongTermMemory;
use parley_mailbox::{ChattingStatusTracker, Mailbox, MailboxMessage};
use std::sync::Arc;
use tracing::{info, warn};

pub struct TaskRunner {
    executor: Arc<StepExecutor>,
    memory: Arc<dyn LongTermMemory>,
    chatting: ChattingStatusTracker,
}

impl TaskRunner {
    pub fn new(executor: Arc<StepExecutor>, memory: Arc<dyn LongTermMemory>) -> Self {
        Self {
            executor,
            memory,
            chatting: ChattingStatusTracker::new(),
        }
    }

    /// Share a tracker with other entry points into the same mailbox.
    pub fn with_chatting(mut self, chatting: ChattingStatusTracker) -> Self {
        self.chatting = chatting;
        self
    }

    pub fn chatting(&self) -> &ChattingStatusTracker {
        &self.chatting
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        self.executor.mailbox()
    }

    /// The long-term memory key for a task: its chat group if that group is
    /// registered, else its user if registered.
    fn memory_key(&self, state: &TaskState) -> Option<String> {
        let accounts = self.mailbox().accounts();
        if let Some(group) = state
            .chat_group_id
            .as_deref()
            .filter(|g| accounts.is_group(g))
        {
            return Some(group.to_string());
        }
        accounts
            .is_user(&state.user_id)
            .then(|| state.user_id.clone())
    }

    // ── Create ──

    pub fn create_task(&self, input: impl Into<String>, state: TaskState) -> Task {
        let key = self.memory_key(&state);
        let task = Task::new(input, state);
        let Some(key) = key else {
            return task;
        };
        match self.memory.read(&key) {
            Ok(history) => task.with_history(key, history),
            Err(e) => {
                warn!(task_id = %task.id, key = %key, error = %e, "Could not read long-term memory, starting without history");
                task.with_history(key, Vec::new())
            }
        }
    }

    /// A task for a drained mailbox message, with the user's live flags.
    pub fn task_from_message(&self, message: MailboxMessage) -> Task {
        let mut state = TaskState::new(&message.user_id, message.system_msg)
            .with_session(self.mailbox().session(&message.user_id));
        state.chat_group_id = message.chat_group_id;
        self.create_task(message.user_msg, state)
    }

    // ── Run ──

    fn started(&self, task: &Task) {
        info!(task_id = %task.id, user_id = %task.state.user_id, "Task started");
        if let Some(events) = self.executor.events() {
            events.publish(AgentEvent::TaskStarted {
                task_id: task.id.clone(),
                user_id: task.state.user_id.clone(),
                timestamp: Utc::now(),
            });
        }
    }

    fn finished(&self, response: &AgentResponse) {
        info!(
            task_id = %response.task_id,
            iterations = response.iterations,
            complete = response.is_complete(),
            "Task finished"
        );
        if let Some(events) = self.executor.events() {
            events.publish(AgentEvent::TaskFinished {
                task_id: response.task_id.clone(),
                iterations: response.iterations,
                budget_exceeded: !response.is_complete(),
                timestamp: Utc::now(),
            });
        }
    }

    pub fn run(&self, task: &mut Task) -> AgentResponse {
        self.started(task);
        let response = self.executor.execute(task);
        self.finished(&response);
        response
    }

    pub async fn arun(&self, task: &mut Task) -> AgentResponse {
        self.started(task);
        let response = self.executor.aexecute(task).await;
        self.finished(&response);
        response
    }

    // ── Finalize ──

    /// Commit the task's new messages and clear them. Returns the key
    /// written, or `None` when there was nothing to write or no registered
    /// key. A second call is a no-op.
    pub fn finalize(&self, task: &mut Task) -> Result<Option<String>, MemoryError> {
        if task.state.new_memory.is_empty() {
            return Ok(None);
        }
        let Some(key) = self.memory_key(&task.state) else {
            warn!(
                task_id = %task.id,
                user_id = %task.state.user_id,
                "No registered memory key, dropping the task's messages"
            );
            task.state.new_memory.clear();
            return Ok(None);
        };
        self.memory.append(&key, &task.state.new_memory)?;
        info!(task_id = %task.id, key = %key, messages = task.state.new_memory.len(), memory = self.memory.name(), "Task committed");
        task.state.new_memory.clear();
        Ok(Some(key))
    }

    // ── Single chat ──

    fn deliver(&self, task: &mut Task, response: &AgentResponse) {
        if let Err(e) = self.finalize(task) {
            warn!(task_id = %task.id, error = %e, "Could not commit the task to long-term memory");
        }
        self.mailbox().put_agent_reply(
            &task.state.user_id,
            &response.response,
            response.references.clone(),
            false,
        );
    }

    /// Run one task on whatever `user_id` has queued and post the answer.
    ///
    /// Fails if the user is not registered or already has a task in flight.
    /// `Ok(None)` when nothing was queued.
    pub fn chat(&self, user_id: &str) -> Result<Option<AgentResponse>, MailboxError> {
        self.mailbox().accounts().check_sender(user_id, None)?;
        let _guard = self.chatting.try_begin(user_id)?;
        let Some(message) = self.mailbox().try_get_user_message(user_id) else {
            return Ok(None);
        };
        let mut task = self.task_from_message(message);
        let response = self.run(&mut task);
        self.deliver(&mut task, &response);
        Ok(Some(response))
    }

    pub async fn achat(&self, user_id: &str) -> Result<Option<AgentResponse>, MailboxError> {
        self.mailbox().accounts().check_sender(user_id, None)?;
        let _guard = self.chatting.try_begin(user_id)?;
        let Some(message) = self.mailbox().try_get_user_message(user_id) else {
            return Ok(None);
        };
        let mut task = self.task_from_message(message);
        let response = self.arun(&mut task).await;
        self.deliver(&mut task, &response);
        Ok(Some(response))
    }
}
