//! Chatting status — at most one in-flight task per user.
//!
//! A task holds a [`ChattingGuard`] for its whole lifetime. The guard clears
//! the flag when dropped, including on early return or panic unwinding, so a
//! failed task never leaves its user locked out.

use dashmap::DashSet;
use parley_core::error::MailboxError;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ChattingStatusTracker {
    chatting: Arc<DashSet<String>>,
}

impl ChattingStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `user_id` as chatting, or fail if a task is already in flight.
    pub fn try_begin(&self, user_id: &str) -> Result<ChattingGuard, MailboxError> {
        if !self.chatting.insert(user_id.to_string()) {
            return Err(MailboxError::AlreadyChatting(user_id.to_string()));
        }
        debug!(user_id, "Chatting started");
        Ok(ChattingGuard {
            chatting: self.chatting.clone(),
            user_id: user_id.to_string(),
        })
    }

    pub fn is_chatting(&self, user_id: &str) -> bool {
        self.chatting.contains(user_id)
    }

    /// Number of users with a task in flight.
    pub fn active(&self) -> usize {
        self.chatting.len()
    }
}

/// Proof that the holder owns the user's single task slot.
#[derive(Debug)]
pub struct ChattingGuard {
    chatting: Arc<DashSet<String>>,
    user_id: String,
}

impl ChattingGuard {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for ChattingGuard {
    fn drop(&mut self) {
        self.chatting.remove(&self.user_id);
        debug!(user_id = %self.user_id, "Chatting finished");
    }
}
