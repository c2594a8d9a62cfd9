//! LLM trait — the black-box chat/predict API the agent reasons with.
//!
//! Two call shapes:
//! - `chat`/`achat` take a full message history and return the completion
//! - `predict`/`apredict` fill a prompt template and return raw text; the
//!   authorization classifier uses these

use crate::error::LlmError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A completion returned by [`Llm::chat`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
}

impl LlmResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// A prompt with `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Substitute every `{name}` with its value in one pass over the
    /// template; substituted text is never scanned again. Unknown
    /// placeholders are left untouched.
    pub fn format(&self, vars: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let hit = after.find('}').and_then(|close| {
                let name = &after[..close];
                vars.iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, value)| (*value, close))
            });
            match hit {
                Some((value, close)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}

/// The language model seen by the agent.
#[async_trait]
pub trait Llm: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Blocking chat completion.
    fn chat(&self, messages: &[Message]) -> Result<LlmResponse, LlmError>;

    /// Async chat completion.
    async fn achat(&self, messages: &[Message]) -> Result<LlmResponse, LlmError>;

    /// Blocking single-prompt completion.
    fn predict(&self, template: &PromptTemplate, vars: &[(&str, &str)]) -> Result<String, LlmError> {
        let prompt = template.format(vars);
        self.chat(&[Message::user(prompt)]).map(|r| r.content)
    }

    /// Async single-prompt completion.
    async fn apredict(
        &self,
        template: &PromptTemplate,
        vars: &[(&str, &str)],
    ) -> Result<String, LlmError> {
        let prompt = template.format(vars);
        self.achat(&[Message::user(prompt)]).await.map(|r| r.content)
    }
}
