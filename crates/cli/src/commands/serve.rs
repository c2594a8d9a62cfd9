//! `parley serve` — Start the HTTP gateway.

use anyhow::Context;
use parley_config::AppConfig;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = AppConfig::load_with(config_path).context("Failed to load config")?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let runner = crate::runtime::build(&config)?;

    println!("Parley Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Users:     {}", config.accounts.users.len());
    println!("   Groups:    {}", config.accounts.chat_groups.len());

    parley_gateway::start(&config.gateway, runner)
        .await
        .context("Gateway stopped")?;
    Ok(())
}
