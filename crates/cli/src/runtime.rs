//! Wiring a [`TaskRunner`] out of the configuration.

use anyhow::Context;
use parley_agent::{ExecutorSettings, StepExecutor, TaskRunner};
use parley_config::AppConfig;
use parley_core::event::EventBus;
use parley_core::memory::LongTermMemory;
use parley_mailbox::{AccountRegistry, Mailbox, SessionConfig};
use parley_memory::{FileBackend, InMemoryBackend};
use parley_tools::notes::SaveNoteOperation;
use parley_tools::{AuthorizerSettings, OperationAuthorizer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

fn memory_backend(config: &AppConfig) -> Arc<dyn LongTermMemory> {
    match (config.memory.backend.as_str(), &config.memory.path) {
        ("file", Some(path)) => Arc::new(FileBackend::new(path)),
        _ => Arc::new(InMemoryBackend::new()),
    }
}

/// Build the whole agent stack. Fails only when the LLM is not configured.
pub fn build(config: &AppConfig) -> anyhow::Result<Arc<TaskRunner>> {
    let llm = parley_providers::build_from_config(&config.provider)
        .context("Failed to set up the language model")?;

    let accounts = Arc::new(AccountRegistry::from_parts(
        &config.accounts.users,
        &config.accounts.chat_groups,
    ));
    let mailbox = Arc::new(Mailbox::new(accounts).with_session_defaults(SessionConfig {
        enable_instruct: config.session.enable_instruct,
        enable_comment: config.session.enable_comment,
        reply_in_speech: config.session.reply_in_speech,
    }));
    let events = Arc::new(EventBus::default());

    let authorizer = Arc::new(
        OperationAuthorizer::new(
            mailbox.clone(),
            llm.clone(),
            AuthorizerSettings {
                strict: config.agent.authorize_strict_mode,
                timeout: Duration::from_secs(config.agent.mailbox_timeout_seconds),
            },
        )
        .with_events(events.clone()),
    );
    let tools = parley_tools::default_registry(
        mailbox.clone(),
        authorizer,
        SaveNoteOperation::default_dir(),
    );
    debug!(tools = ?tools.names(), "Tools registered");

    let memory = memory_backend(config);
    let settings = ExecutorSettings::from(&config.agent);
    let executor = StepExecutor::new(llm.clone(), Arc::new(tools), mailbox)
        .with_settings(settings)
        .with_events(events);

    info!(
        llm = llm.name(),
        memory = memory.name(),
        max_iterations = settings.max_iterations,
        "Agent ready"
    );
    Ok(Arc::new(TaskRunner::new(Arc::new(executor), memory)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_reported() {
        let mut config = AppConfig::default();
        config.provider.api_key = None;
        let err = build(&config).err().unwrap();
        assert!(format!("{err:#}").contains("no API key"));
    }

    #[test]
    fn builds_with_a_key() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-test".into());
        config.accounts.users = vec!["alice".into()];
        let runner = build(&config).unwrap();
        assert!(runner.mailbox().accounts().is_user("alice"));
    }

    #[test]
    fn file_memory_is_selected_by_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.memory.backend = "file".into();
        config.memory.path = Some(dir.path().to_path_buf());
        assert_eq!(memory_backend(&config).name(), "file");
        config.memory.backend = "in_memory".into();
        assert_eq!(memory_backend(&config).name(), "in_memory");
    }
}
