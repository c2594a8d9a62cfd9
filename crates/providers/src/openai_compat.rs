//! OpenAI-compatible LLM implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/v1/chat/completions`.
//!
//! `achat` uses an async `reqwest::Client`; `chat` uses a blocking client
//! that is built on first use, so constructing this type inside an async
//! runtime is safe.

use async_trait::async_trait;
use parley_core::error::LlmError;
use parley_core::llm::{Llm, LlmResponse};
use parley_core::message::{Message, Role};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAiCompatLlm {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
    blocking: OnceLock<reqwest::blocking::Client>,
}

impl OpenAiCompatLlm {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.1,
            client,
            blocking: OnceLock::new(),
        })
    }

    /// Ollama on its default port (no real key needed).
    pub fn ollama(model: impl Into<String>) -> Result<Self, LlmError> {
        Self::new("http://localhost:11434/v1", "ollama", model)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn blocking_client(&self) -> Result<&reqwest::blocking::Client, LlmError> {
        if let Some(client) = self.blocking.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(self.blocking.get_or_init(|| client))
    }

    /// Convert our messages to the OpenAI wire format. Tool logs are sent
    /// as system messages since they answer no tool call id.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System | Role::Tool => "system",
                }
                .into(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn request_body(&self, messages: &[Message]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(messages),
            "temperature": self.temperature,
            "stream": false,
        })
    }

    /// Map a non-200 status and its body to an error.
    fn status_error(status: u16, body: String) -> LlmError {
        match status {
            429 => LlmError::RateLimited {
                retry_after_secs: 5,
            },
            401 | 403 => LlmError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ),
            _ => {
                warn!(status, body = %body, "LLM endpoint returned error");
                LlmError::ApiError {
                    status_code: status,
                    message: body,
                }
            }
        }
    }

    fn first_choice(response: ApiResponse) -> Result<LlmResponse, LlmError> {
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyCompletion)?;
        Ok(LlmResponse::new(content))
    }
}

#[async_trait]
impl Llm for OpenAiCompatLlm {
    fn name(&self) -> &str {
        &self.model
    }

    fn chat(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
        debug!(model = %self.model, messages = messages.len(), "Sending blocking completion request");
        let response = self
            .blocking_client()?
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages))
            .send()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().unwrap_or_default();
            return Err(Self::status_error(status, body));
        }

        let parsed: ApiResponse = response.json().map_err(|e| LlmError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;
        Self::first_choice(parsed)
    }

    async fn achat(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
        debug!(model = %self.model, messages = messages.len(), "Sending completion request");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages))
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }

        let parsed: ApiResponse = response.json().await.map_err(|e| LlmError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;
        Self::first_choice(parsed)
    }
}

// --- OpenAI wire types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let llm = OpenAiCompatLlm::new("https://api.example.com/v1/", "sk", "m").unwrap();
        assert_eq!(llm.endpoint(), "https://api.example.com/v1/chat/completions");
        assert_eq!(llm.name(), "m");
    }

    #[test]
    fn ollama_constructor() {
        let llm = OpenAiCompatLlm::ollama("llama3").unwrap();
        assert!(llm.base_url.contains("localhost:11434"));
    }

    #[test]
    fn message_conversion_folds_tool_logs_into_system() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::tool("searched papers"),
            Message::assistant("Hi"),
        ];
        let api = OpenAiCompatLlm::to_api_messages(&messages);
        let roles: Vec<&str> = api.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "system", "assistant"]);
    }

    #[test]
    fn request_body_carries_model_and_temperature() {
        let llm = OpenAiCompatLlm::new("http://x", "sk", "m1")
            .unwrap()
            .with_temperature(0.5);
        let body = llm.request_body(&[Message::user("q")]);
        assert_eq!(body["model"], "m1");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["content"], "q");
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            OpenAiCompatLlm::status_error(429, String::new()),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            OpenAiCompatLlm::status_error(401, String::new()),
            LlmError::AuthenticationFailed(_)
        ));
        match OpenAiCompatLlm::status_error(500, "boom".into()) {
            LlmError::ApiError {
                status_code,
                message,
            } => {
                assert_eq!(status_code, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_status_is_returned_without_parsing_the_body() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let body = "upstream exploded";
            let reply = format!(
                "HTTP/1.1 500 Internal Server Error\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
        });

        let llm = OpenAiCompatLlm::new(&format!("http://{addr}"), "sk", "m").unwrap();
        let err = llm.achat(&[Message::user("q")]).await.unwrap_err();
        assert!(matches!(
            err,
            LlmError::ApiError { status_code: 500, ref message } if message == "upstream exploded"
        ));
    }

    #[test]
    fn first_choice_requires_content() {
        let ok: ApiResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"hi"}}]}"#).unwrap();
        assert_eq!(OpenAiCompatLlm::first_choice(ok).unwrap().content, "hi");

        let empty: ApiResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            OpenAiCompatLlm::first_choice(empty),
            Err(LlmError::EmptyCompletion)
        ));
    }

    #[tokio::test]
    async fn construction_inside_runtime_is_safe() {
        let llm = OpenAiCompatLlm::new("http://127.0.0.1:9", "sk", "m").unwrap();
        assert!(llm.blocking.get().is_none());
    }
}
