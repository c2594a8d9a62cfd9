//! `parley config` — Configuration management commands.

use anyhow::Context;
use parley_config::AppConfig;
use std::path::Path;

pub fn validate(config_path: Option<&Path>) -> anyhow::Result<()> {
    println!("Validating configuration...");

    let config = match AppConfig::load_with(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    let mut warnings = Vec::new();
    if config.provider.api_key.is_none() {
        warnings.push("No API key set (set provider.api_key, PARLEY_API_KEY or OPENAI_API_KEY)");
    }
    if config.accounts.users.is_empty() {
        warnings.push("No users registered; every inbound message will be rejected");
    }
    if config.agent.observation_max_chars == 0 {
        warnings.push("Observation truncation is off; long tool outputs go to the LLM whole");
    }

    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Model:     {} @ {}", config.provider.model, config.provider.base_url);
    println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Memory:    {}", config.memory.backend);
    println!("   Users:     {}", config.accounts.users.join(", "));
    println!(
        "   Iterations: {}  Mailbox timeout: {}s  Strict confirm: {}",
        config.agent.max_iterations,
        config.agent.mailbox_timeout_seconds,
        config.agent.authorize_strict_mode
    );
    Ok(())
}

pub fn show(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = AppConfig::load_with(config_path).context("Failed to load config")?;
    let toml_str = toml::to_string_pretty(&config.redacted())?;
    println!("{toml_str}");
    Ok(())
}

pub fn path(config_path: Option<&Path>) {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::default_path);
    println!("{}", path.display());
}
