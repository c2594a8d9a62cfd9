//! Parley CLI — the main entry point.
//!
//! Commands:
//! - `chat`    — Talk to the agent from the terminal
//! - `serve`   — Start the HTTP gateway
//! - `config`  — Show, validate, or locate the configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Parley — a ReAct agent that asks before it acts",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.parley/config.toml)
    #[arg(short, long, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent interactively
    Chat {
        /// Your user id
        #[arg(short, long)]
        user: String,

        /// Review each proposed step before it runs
        #[arg(long)]
        instruct: bool,

        /// Comment on each observation
        #[arg(long)]
        comment: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Check the configuration for errors
    Validate,
    /// Print the config file path
    Path,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Chat {
            user,
            instruct,
            comment,
        } => commands::chat::run(config, &user, instruct, comment).await?,
        Commands::Serve { port } => commands::serve::run(config, port).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config)?,
            ConfigAction::Validate => commands::config_cmd::validate(config)?,
            ConfigAction::Path => commands::config_cmd::path(config),
        },
    }

    Ok(())
}
