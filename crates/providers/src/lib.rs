//! LLM backends for Parley.
//!
//! All backends implement `parley_core::Llm`. Any endpoint that speaks the
//! OpenAI `/chat/completions` dialect (OpenAI, OpenRouter, Ollama, vLLM)
//! is served by [`OpenAiCompatLlm`].

pub mod openai_compat;

pub use openai_compat::OpenAiCompatLlm;

use parley_config::ProviderConfig;
use parley_core::error::LlmError;
use parley_core::llm::Llm;
use std::sync::Arc;

/// Build the configured LLM.
pub fn build_from_config(config: &ProviderConfig) -> Result<Arc<dyn Llm>, LlmError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        LlmError::NotConfigured("no API key: set provider.api_key or PARLEY_API_KEY".into())
    })?;
    let llm = OpenAiCompatLlm::new(&config.base_url, api_key, &config.model)?
        .with_temperature(config.temperature);
    Ok(Arc::new(llm))
}
