// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Runner entry point: load config, then attach to the broker in a loop,
//! reconnecting with exponential backoff whenever the session ends.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rb_runner::config::RunnerConfig;
use rb_runner::RunnerState;
use tracing::{error, info, warn};

/// 0 success; everything else is a distinct, typed failure a supervising
/// process (systemd, the launching CLI) can branch on without parsing logs.
const EXIT_CONFIG_INVALID: u8 = 2;
const EXIT_DEPENDENCY_INSTALL_FAILED: u8 = 3;

/// Attach this runner to a broker and execute the commands it sends.
#[derive(Parser, Debug)]
#[command(name = "rb-runner", version)]
struct Args {
    /// Overrides `RB_RUNNER_BROKER_ADDR` / the config file.
    #[arg(long)]
    broker_addr: Option<String>,
    /// Overrides `RB_RUNNER_ID`.
    #[arg(long)]
    runner_id: Option<String>,
    /// Overrides `RB_RUNNER_SECRET`.
    #[arg(long)]
    secret: Option<String>,
    /// Overrides `RB_RUNNER_WORKSPACE_ROOT`.
    #[arg(long)]
    workspace_root: Option<std::path::PathBuf>,
    /// Path to the agent provider binary invoked for `start-build`.
    #[arg(long, default_value = "claude")]
    provider_binary: String,
    /// Verify configuration and the provider binary, then exit without
    /// attaching to a broker.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = RunnerConfig::load();
    if let Some(v) = args.broker_addr {
        config = config.broker_addr(v);
    }
    if let Some(v) = args.runner_id {
        config.runner_id = Some(v);
    }
    if let Some(v) = args.secret {
        config = config.secret(v);
    }
    if let Some(v) = args.workspace_root {
        config = config.workspace_root(v);
    }

    if config.secret.is_empty() || config.broker_addr.is_empty() {
        error!("config invalid: broker_addr and secret must both be set");
        return ExitCode::from(EXIT_CONFIG_INVALID);
    }

    if args.check {
        return match check_provider(&args.provider_binary).await {
            Ok(()) => {
                info!(provider_binary = %args.provider_binary, "provider binary is runnable");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(provider_binary = %args.provider_binary, error = %e, "provider binary is not runnable");
                ExitCode::from(EXIT_DEPENDENCY_INSTALL_FAILED)
            }
        };
    }

    if let Err(e) = tokio::fs::create_dir_all(&config.workspace_root).await {
        error!(error = %e, "config invalid: workspace root is not creatable");
        return ExitCode::from(EXIT_CONFIG_INVALID);
    }

    let runner_id = config.runner_id();
    let broker_addr = config.broker_addr.clone();
    let state = RunnerState::new(config.clone(), args.provider_binary);

    info!(%runner_id, %broker_addr, "starting runner");

    let mut attempt: u32 = 0;
    loop {
        match rb_runner::run_session(state.clone(), &broker_addr).await {
            Ok(()) => {
                info!("session ended cleanly, reconnecting");
                attempt = 0;
            }
            Err(e) => {
                warn!(error = %e, "session ended with an error, reconnecting");
                attempt = attempt.saturating_add(1);
            }
        }
        let backoff = std::cmp::min(
            config.reconnect_backoff_base() * 2u32.saturating_pow(attempt),
            config.reconnect_backoff_max(),
        );
        tokio::time::sleep(backoff).await;
    }
}

/// Best-effort preflight: the agent provider binary must at least be
/// invocable. A missing binary or a non-zero/`--version` refusal is
/// classified as a failed dependency install, not a config error.
async fn check_provider(provider_binary: &str) -> Result<(), std::io::Error> {
    let status = tokio::process::Command::new(provider_binary)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("{provider_binary} --version exited with {status}")))
    }
}
