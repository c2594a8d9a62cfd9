//! Value types exchanged through the mailbox.

use serde::{Deserialize, Serialize};

/// Live per-user flags. Each inbound message overwrites them, and a
/// running task re-reads them after every wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub enable_instruct: bool,
    #[serde(default)]
    pub enable_comment: bool,
    #[serde(default)]
    pub reply_in_speech: bool,
}

/// One fragment sent by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user_id: String,
    pub text: String,
    /// Paths of files the user uploaded with this fragment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_group_id: Option<String>,
    #[serde(flatten)]
    pub session: SessionConfig,
}

impl ChatMessage {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            text: text.into(),
            file_paths: Vec::new(),
            chat_group_id: None,
            session: SessionConfig::default(),
        }
    }

    pub fn with_files(mut self, paths: Vec<String>) -> Self {
        self.file_paths = paths;
        self
    }

    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.chat_group_id = Some(group_id.into());
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

/// Text the agent sees when the user stays silent past the wait bound.
pub const NO_REPLY_TEXT: &str = "The user did not reply in time.";

/// Merged view of everything a user queued since the last read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxMessage {
    pub user_id: String,
    pub system_msg: String,
    pub user_msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_group_id: Option<String>,
    /// True for the "no reply" sentinel.
    #[serde(default)]
    pub timed_out: bool,
}

impl MailboxMessage {
    /// The "no reply" sentinel.
    pub fn no_reply(user_id: impl Into<String>, timeout_secs: u64) -> Self {
        let user_id = user_id.into();
        Self {
            system_msg: format!(
                "No further input arrived from user {user_id} within {timeout_secs} seconds. \
                 Continue with the information you already have."
            ),
            user_msg: NO_REPLY_TEXT.to_string(),
            user_id,
            chat_group_id: None,
            timed_out: true,
        }
    }
}

/// Text handed to the transport while no reply is ready.
pub const PLEASE_WAIT_TEXT: &str = "Please wait.";

/// The latest thing the agent wants to tell a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    pub text: String,
    #[serde(default)]
    pub references: Vec<String>,
    /// Produced while a task is suspended (instruct/comment/confirm), not a
    /// final answer.
    pub inner: bool,
    #[serde(default)]
    pub reply_in_speech: bool,
}

impl AgentReply {
    /// The "please wait" sentinel.
    pub fn please_wait() -> Self {
        Self {
            text: PLEASE_WAIT_TEXT.to_string(),
            references: Vec::new(),
            inner: true,
            reply_in_speech: false,
        }
    }

    pub fn is_please_wait(&self) -> bool {
        self.inner && self.text == PLEASE_WAIT_TEXT && self.references.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_flags_are_flat_on_the_wire() {
        let msg: ChatMessage = serde_json::from_str(
            r#"{"user_id":"alice","text":"hi","enable_comment":true}"#,
        )
        .unwrap();
        assert!(msg.session.enable_comment);
        assert!(!msg.session.enable_instruct);
        assert!(msg.file_paths.is_empty());
    }

    #[test]
    fn no_reply_sentinel_is_marked() {
        let msg = MailboxMessage::no_reply("alice", 5);
        assert!(msg.timed_out);
        assert_eq!(msg.user_msg, NO_REPLY_TEXT);
        assert!(msg.system_msg.contains("5 seconds"));
    }

    #[test]
    fn please_wait_sentinel_is_recognized() {
        assert!(AgentReply::please_wait().is_please_wait());
        let real = AgentReply {
            text: "done".into(),
            references: vec![],
            inner: false,
            reply_in_speech: false,
        };
        assert!(!real.is_please_wait());
    }
}
