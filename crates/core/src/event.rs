//! Agent event system — observe task progress without coupling to it.
//!
//! The executor publishes an event at each state transition. The CLI and
//! the gateway may subscribe; nobody has to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All agent events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEvent {
    /// A task began for a user
    TaskStarted {
        task_id: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The step executor entered a new state
    StepTransition {
        task_id: String,
        state: String,
        iteration: u32,
    },

    /// A tool was executed
    ToolExecuted {
        task_id: String,
        tool_name: String,
        is_error: bool,
        duration_ms: u64,
    },

    /// A gated operation entered a phase of its consent flow
    AuthorizationPhase {
        user_id: String,
        operation: String,
        phase: String,
    },

    /// A gated operation was confirmed or declined
    AuthorizationResolved {
        user_id: String,
        operation: String,
        aborted: bool,
    },

    /// A task reached DONE or ran out of iterations
    TaskFinished {
        task_id: String,
        iterations: u32,
        budget_exceeded: bool,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Publishing
/// never blocks, so it is safe to call from the blocking driver too.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
