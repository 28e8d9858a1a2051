// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! `rb` - control-plane CLI for the broker's HTTP surface: issue and
//! manage runner keys, inspect attached runners, and dispatch commands
//! without going through a UI.

mod client;
mod commands;
mod exit_error;
mod output;

use clap::{Parser, Subcommand};
use exit_error::ExitError;
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "rb", version, about = "Control-plane CLI for the runner broker")]
struct Cli {
    /// Broker base URL, e.g. http://127.0.0.1:8080.
    #[arg(long, env = "RB_BROKER_URL", default_value = "http://127.0.0.1:8080")]
    broker_url: String,
    /// Caller identity forwarded as `x-user-id`; required for key and
    /// file-deletion endpoints.
    #[arg(long, env = "RB_USER_ID")]
    user_id: Option<String>,
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runner key lifecycle.
    Keys {
        #[command(subcommand)]
        command: commands::keys::KeysCommand,
    },
    /// List attached runner connections.
    Status,
    /// Dispatch a command to an attached runner.
    Run {
        #[command(subcommand)]
        command: commands::run::RunCommand,
    },
    /// Delete a project's files on its runner.
    Files {
        #[command(subcommand)]
        command: FilesCommand,
    },
}

#[derive(Subcommand)]
enum FilesCommand {
    Delete { project: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        if let Some(exit_err) = e.downcast_ref::<ExitError>() {
            eprintln!("error: {}", exit_err.message);
            std::process::exit(exit_err.code);
        }
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = client::BrokerClient::new(cli.broker_url, cli.user_id);
    let result = match cli.command {
        Command::Keys { command } => commands::keys::handle(&client, command, cli.format).await,
        Command::Status => commands::status::handle(&client, cli.format).await,
        Command::Run { command } => commands::run::handle(&client, command, cli.format).await,
        Command::Files { command } => match command {
            FilesCommand::Delete { project } => commands::files::handle_delete(&client, project, cli.format).await,
        },
    };
    result.map_err(promote_api_error)
}

/// Give broker error codes a stable CLI exit code instead of the generic
/// `1` every other failure gets, so scripts can branch on e.g. auth vs.
/// a disconnected runner without parsing stderr.
fn promote_api_error(err: anyhow::Error) -> anyhow::Error {
    let Some(client_err) = err.downcast_ref::<client::ClientError>() else {
        return err;
    };
    let code = match client_err.api_code() {
        Some("unauthorized") => 10,
        Some("forbidden") => 11,
        Some("not_found") => 12,
        Some("conflict") => 13,
        Some("runner_disconnected") => 14,
        Some("timeout") => 15,
        Some("validation") => 16,
        _ => return err,
    };
    let message = client_err.to_string();
    ExitError::new(code, message).into()
}
