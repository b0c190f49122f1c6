use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use chatpass_core::commands::init::{chatpass_root, ensure_initialized_at};
use chatpass_core::services::{ChatError, ChatProvider, Denied, OpenAiProvider};
use chatpass_core::utils::clock::SystemClock;
use chatpass_core::Commands;

#[derive(Parser)]
#[command(
    name = "chatpass-admin",
    about = "Operate a chatpass root: codes, balances, rewards and chat"
)]
struct Cli {
    /// Root directory (defaults to $CHATPASS_ROOT or .chatpass)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create the root layout and default config.toml
    Init,
    /// List the configured access codes
    Codes,
    /// Show the balance of an identity
    Status {
        #[arg(long)]
        identity: String,
    },
    /// Redeem an access code for an identity without spending a use
    Verify {
        #[arg(long)]
        identity: String,
        #[arg(long)]
        code: String,
    },
    /// Spend one use and send a message to the chat provider
    Chat {
        #[arg(long)]
        identity: String,
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        message: String,
    },
    /// Submit a game score and grant any unlocked reward tiers
    Score {
        #[arg(long)]
        identity: String,
        #[arg(long)]
        score: u64,
    },
    /// Print recent chat history of an identity
    History {
        #[arg(long)]
        identity: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Run one maintenance pass (history purge, daily reset, retention, flush)
    Cleanup,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(chatpass_root);
    let report = ensure_initialized_at(&root)
        .with_context(|| format!("initializing {}", root.display()))?;

    if let Cmd::Init = cli.cmd {
        print_json(&json!({
            "root": report.root.display().to_string(),
            "created": report.created,
            "existed": report.existed,
            "at": Utc::now().to_rfc3339(),
        }))?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = report.config.clone();
    let provider: Option<Box<dyn ChatProvider>> = match &cli.cmd {
        Cmd::Chat { .. } => Some(Box::new(
            OpenAiProvider::from_config(&config.provider).context("configuring chat provider")?,
        )),
        _ => None,
    };
    let commands = Commands::open(config, provider, Arc::new(SystemClock))?;

    match cli.cmd {
        Cmd::Init => {}
        Cmd::Codes => print_json(&commands.codes())?,
        Cmd::Status { identity } => match commands.check_status(&identity) {
            Some(status) => print_json(&status)?,
            None => {
                print_json(&json!({ "success": false, "identity": identity, "error": "no balance" }))?;
                return Ok(ExitCode::FAILURE);
            }
        },
        Cmd::Verify { identity, code } => match commands.verify_access(&identity, &code) {
            Ok(access) => print_json(&access)?,
            Err(denied) => return denied_exit(&denied),
        },
        Cmd::Chat {
            identity,
            code,
            message,
        } => match commands.chat(&identity, code.as_deref(), &message) {
            Ok(reply) => print_json(&reply)?,
            Err(ChatError::Denied(denied)) => return denied_exit(&denied),
            Err(ChatError::Provider { error, balance }) => {
                print_json(&json!({
                    "success": false,
                    "error": error.user_message(),
                    "detail": error.to_string(),
                    "uses_left": balance.remaining,
                }))?;
                return Ok(ExitCode::FAILURE);
            }
            Err(other) => {
                print_json(&json!({ "success": false, "error": other.to_string() }))?;
                return Ok(ExitCode::FAILURE);
            }
        },
        Cmd::Score { identity, score } => match commands.submit_score(&identity, score) {
            Ok(outcome) => print_json(&outcome)?,
            Err(denied) => return denied_exit(&denied),
        },
        Cmd::History { identity, limit } => print_json(&commands.history(&identity, limit))?,
        Cmd::Cleanup => print_json(&commands.run_maintenance())?,
    }

    commands.flush()?;
    Ok(ExitCode::SUCCESS)
}

fn denied_exit(denied: &Denied) -> Result<ExitCode> {
    print_json(&json!({
        "success": false,
        "reason": denied.reason(),
        "error": denied.to_string(),
    }))?;
    Ok(ExitCode::FAILURE)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
