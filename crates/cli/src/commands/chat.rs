//! `parley chat` — Interactive chat through the mailbox.
//!
//! Each line typed at the top-level prompt starts a task. While the task
//! runs, its inner replies (questions, confirmations, observations to
//! comment on) are printed and answered from the same prompt.

use anyhow::Context;
use parley_agent::TaskRunner;
use parley_config::AppConfig;
use parley_mailbox::{AgentReply, ChatMessage, SessionConfig};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(150);

fn prompt(label: &str) -> std::io::Result<()> {
    print!("  {label} > ");
    std::io::stdout().flush()
}

fn print_reply(reply: &AgentReply) {
    println!();
    let label = if reply.inner { "Agent ?" } else { "Agent" };
    for line in reply.text.lines() {
        println!("  {label} > {line}");
    }
    for reference in &reply.references {
        println!("           [{reference}]");
    }
    println!();
}

/// Next non-empty line, or `None` on EOF or `exit`.
async fn read_line(lines: &mut Lines<BufReader<Stdin>>) -> anyhow::Result<Option<String>> {
    loop {
        let Some(line) = lines.next_line().await? else {
            return Ok(None);
        };
        let line = line.trim();
        if line == "exit" || line == "quit" {
            return Ok(None);
        }
        if !line.is_empty() {
            return Ok(Some(line.to_string()));
        }
    }
}

/// Drive one task to its final reply, answering inner replies from stdin.
/// Returns `false` when the user quit mid-task.
async fn converse(
    runner: &Arc<TaskRunner>,
    user: &str,
    session: SessionConfig,
    lines: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<bool> {
    let task = {
        let runner = runner.clone();
        let user = user.to_string();
        tokio::spawn(async move { runner.achat(&user).await })
    };

    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let reply = runner.mailbox().get_agent_reply(user);
        if reply.is_please_wait() {
            if task.is_finished() {
                break;
            }
            continue;
        }
        print_reply(&reply);
        if !reply.inner {
            break;
        }
        prompt("You")?;
        let Some(answer) = read_line(lines).await? else {
            // The task keeps running until its waits time out.
            return Ok(false);
        };
        runner
            .mailbox()
            .put_user_message(ChatMessage::new(user, answer).with_session(session))?;
    }

    match task.await.context("Task panicked")? {
        Ok(Some(response)) => {
            if let Some(err) = &response.error {
                warn!(error = %err, "Task ended without an answer");
            }
        }
        Ok(None) => {}
        Err(e) => println!("  [Error] {e}"),
    }
    Ok(true)
}

pub async fn run(
    config_path: Option<&Path>,
    user: &str,
    instruct: bool,
    comment: bool,
) -> anyhow::Result<()> {
    let config = AppConfig::load_with(config_path).context("Failed to load config")?;
    let runner = crate::runtime::build(&config)?;

    let accounts = runner.mailbox().accounts();
    if !accounts.is_user(user) {
        info!(user_id = user, "Registering user for this session");
        accounts.register_user(user);
    }

    let session = SessionConfig {
        enable_instruct: instruct || config.session.enable_instruct,
        enable_comment: comment || config.session.enable_comment,
        reply_in_speech: false,
    };

    println!();
    println!("  Parley — interactive mode");
    println!();
    println!("  User:      {user}");
    println!("  Model:     {}", config.provider.model);
    println!("  Instruct:  {}", session.enable_instruct);
    println!("  Comment:   {}", session.enable_comment);
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt("You")?;
        let Some(text) = read_line(&mut lines).await? else {
            break;
        };
        runner
            .mailbox()
            .put_user_message(ChatMessage::new(user, text).with_session(session))?;
        if !converse(&runner, user, session, &mut lines).await? {
            break;
        }
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}
