// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! `rb run` - dispatch a command to an attached runner

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use rb_core::id::{ProjectId, RunnerId};
use rb_wire::CommandBody;

use crate::client::BrokerClient;
use crate::output::OutputFormat;

#[derive(Subcommand)]
pub enum RunCommand {
    /// Start a build from a prompt.
    Build {
        #[arg(long)]
        runner: String,
        #[arg(long)]
        project: String,
        prompt: String,
    },
    /// Start (or restart) the project's dev server.
    DevServer {
        #[arg(long)]
        runner: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        run_command: String,
        #[arg(long)]
        cwd: PathBuf,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Stop the project's dev server.
    StopDevServer {
        #[arg(long)]
        runner: String,
        #[arg(long)]
        project: String,
    },
    /// Open a tunnel on a port the dev server is already listening on.
    Tunnel {
        #[arg(long)]
        runner: String,
        #[arg(long)]
        project: String,
        port: u16,
    },
}

pub async fn handle(client: &BrokerClient, command: RunCommand, format: OutputFormat) -> Result<()> {
    let (runner, project, body) = match command {
        RunCommand::Build { runner, project, prompt } => {
            (runner, project, CommandBody::StartBuild { prompt, options: HashMap::new() })
        }
        RunCommand::DevServer { runner, project, run_command, cwd, port } => (
            runner,
            project,
            CommandBody::StartDevServer { run_command, cwd, env: Vec::new(), preferred_port: port },
        ),
        RunCommand::StopDevServer { runner, project } => (runner, project, CommandBody::StopDevServer),
        RunCommand::Tunnel { runner, project, port } => (runner, project, CommandBody::StartTunnel { port }),
    };

    let command_id = client
        .send_command(RunnerId::from(runner), ProjectId::from(project), body)
        .await?;

    crate::output::print(format, &command_id, |id| println!("Dispatched {id}"))?;
    Ok(())
}
