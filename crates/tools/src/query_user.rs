//! Query-user tool — asks the user a free-form question mid-task.

use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext, ToolMetadata, ToolOutput};
use parley_mailbox::{Mailbox, MailboxMessage};
use std::sync::Arc;
use std::time::Duration;

pub struct QueryUserTool {
    mailbox: Arc<Mailbox>,
    timeout: Duration,
}

impl QueryUserTool {
    pub fn new(mailbox: Arc<Mailbox>, timeout: Duration) -> Self {
        Self { mailbox, timeout }
    }

    /// Accepts `{"question": "..."}` or a bare string.
    fn question(args: &serde_json::Value) -> Result<String, ToolError> {
        let text = match args {
            serde_json::Value::String(s) => Some(s.as_str()),
            other => other["question"].as_str(),
        };
        match text.map(str::trim) {
            Some(q) if !q.is_empty() => Ok(q.to_string()),
            _ => Err(ToolError::InvalidArguments(
                "Missing 'question' argument".into(),
            )),
        }
    }

    fn answer(reply: MailboxMessage) -> String {
        if reply.timed_out {
            format!("{}\n{}", reply.user_msg, reply.system_msg)
        } else {
            reply.user_msg
        }
    }
}

#[async_trait]
impl Tool for QueryUserTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "query_user".into(),
            description: "Ask the user a question and wait for the answer. \
                          Input: {\"question\": \"...\"}."
                .into(),
            return_direct: false,
        }
    }

    fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let question = Self::question(&args)?;
        self.mailbox
            .put_agent_reply(&ctx.user_id, &question, Vec::new(), true);
        let reply = self.mailbox.get_user_message(&ctx.user_id, self.timeout);
        Ok(ToolOutput::text("query_user", args, Self::answer(reply)))
    }

    async fn acall(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let question = Self::question(&args)?;
        self.mailbox
            .put_agent_reply(&ctx.user_id, &question, Vec::new(), true);
        let reply = self
            .mailbox
            .aget_user_message(&ctx.user_id, self.timeout)
            .await;
        Ok(ToolOutput::text("query_user", args, Self::answer(reply)))
    }
}
