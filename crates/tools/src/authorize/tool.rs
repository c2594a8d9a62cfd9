//! Exposes a [`GatedOperation`] to the agent as an ordinary tool.

use super::collect::render_params;
use super::{GatedOperation, OperationAuthorizer, OperationOutcome};
use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext, ToolMetadata, ToolOutput};
use parley_core::tool_log::ToolLog;
use std::sync::Arc;

pub struct CollectAndAuthorizeTool {
    operation: Arc<dyn GatedOperation>,
    authorizer: Arc<OperationAuthorizer>,
}

impl CollectAndAuthorizeTool {
    pub fn new(operation: Arc<dyn GatedOperation>, authorizer: Arc<OperationAuthorizer>) -> Self {
        Self {
            operation,
            authorizer,
        }
    }

    fn into_output(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
        outcome: OperationOutcome,
    ) -> ToolOutput {
        let name = self.operation.name();
        let mut description = format!(
            "Have collected these information from the user {}:\n{}\n",
            ctx.user_id,
            render_params(&outcome.params)
        );
        if outcome.aborted {
            description.push_str(&outcome.log_to_system.description);
        } else {
            description.push_str("Then try to do the following operation.\n");
            description.push_str(&outcome.log_to_system.description);
        }

        let mut log = ToolLog::new(name, description)
            .with_references(outcome.log_to_system.references.clone());
        if let Some(text) = outcome.log_to_user {
            log = log.with_log_to_user(text);
        }
        if outcome.aborted {
            log = log.aborted();
        }
        ToolOutput::with_log(name, args, outcome.output, &log)
    }
}

#[async_trait]
impl Tool for CollectAndAuthorizeTool {
    fn metadata(&self) -> ToolMetadata {
        let fields: Vec<String> = self
            .operation
            .required_fields()
            .into_iter()
            .map(|f| format!("\"{}\": {}", f.name, f.description))
            .collect();
        ToolMetadata {
            name: self.operation.name().to_string(),
            description: format!(
                "{} The user is asked for anything missing and must confirm before it runs. \
                 Input: a JSON object with {}.",
                self.operation.description(),
                fields.join(", ")
            ),
            return_direct: false,
        }
    }

    fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let outcome = self.authorizer.authorize(self.operation.as_ref(), &args, ctx);
        Ok(self.into_output(args, ctx, outcome))
    }

    async fn acall(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let outcome = self
            .authorizer
            .aauthorize(self.operation.as_ref(), &args, ctx)
            .await;
        Ok(self.into_output(args, ctx, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{AuthorizerSettings, FieldSpec, OperationResult, Params};
    use super::*;
    use parley_core::error::LlmError;
    use parley_core::llm::{Llm, LlmResponse};
    use parley_core::message::Message;
    use parley_mailbox::{AccountRegistry, ChatMessage, Mailbox};
    use std::collections::HashMap;
    use std::time::Duration;

    struct Greet;

    impl GatedOperation for Greet {
        fn name(&self) -> &str {
            "send_greeting"
        }
        fn description(&self) -> &str {
            "Send a greeting card."
        }
        fn required_fields(&self) -> Vec<FieldSpec> {
            vec![FieldSpec::new("to", "Recipient")]
        }
        fn describe(&self, params: &Params) -> String {
            format!("Send a card to {}", params["to"])
        }
        fn execute(&self, _p: &Params, _c: &ToolContext) -> Result<OperationResult, ToolError> {
            Ok(OperationResult {
                output: "sent".into(),
                log_to_user: Some("Card sent.".into()),
                references: vec!["cards/1".into()],
            })
        }
    }

    struct NeverCalled;

    #[async_trait]
    impl Llm for NeverCalled {
        fn name(&self) -> &str {
            "never"
        }
        fn chat(&self, _m: &[Message]) -> Result<LlmResponse, LlmError> {
            panic!("strict mode must not consult the LLM")
        }
        async fn achat(&self, m: &[Message]) -> Result<LlmResponse, LlmError> {
            self.chat(m)
        }
    }

    fn tool() -> (Arc<Mailbox>, CollectAndAuthorizeTool) {
        let accounts = AccountRegistry::from_parts(&["bob".to_string()], &HashMap::new());
        let mailbox = Arc::new(Mailbox::new(Arc::new(accounts)));
        let authorizer = OperationAuthorizer::new(
            mailbox.clone(),
            Arc::new(NeverCalled),
            AuthorizerSettings {
                strict: true,
                timeout: Duration::from_millis(100),
            },
        );
        let tool = CollectAndAuthorizeTool::new(Arc::new(Greet), Arc::new(authorizer));
        (mailbox, tool)
    }

    #[test]
    fn metadata_lists_required_fields() {
        let (_, tool) = tool();
        let meta = tool.metadata();
        assert_eq!(meta.name, "send_greeting");
        assert!(meta.description.contains("\"to\": Recipient"));
        assert!(!meta.return_direct);
    }

    #[test]
    fn agreed_operation_carries_a_log() {
        let (mailbox, tool) = tool();
        mailbox.put_user_message(ChatMessage::new("bob", "yes")).unwrap();
        let out = tool
            .call(serde_json::json!({"to": "Ada"}), &ToolContext::new("bob"))
            .unwrap();
        let (text, log) = out.split();
        assert_eq!(text, "sent");
        let log = log.unwrap();
        assert!(!log.abort);
        assert_eq!(log.log_to_user.as_deref(), Some("Card sent."));
        assert!(log.log_to_system.description.starts_with(
            "Have collected these information from the user bob:\nto: Ada\nThen try to do"
        ));
        assert_eq!(log.log_to_system.references, vec!["cards/1"]);
    }

    #[test]
    fn declined_operation_is_flagged_aborted() {
        let (mailbox, tool) = tool();
        mailbox.put_user_message(ChatMessage::new("bob", "no")).unwrap();
        let out = tool
            .call(serde_json::json!({"to": "Ada"}), &ToolContext::new("bob"))
            .unwrap();
        let (text, log) = out.split();
        assert!(text.contains("declined"));
        assert!(log.unwrap().abort);
    }
}
