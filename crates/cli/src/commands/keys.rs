// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! `rb keys` - runner key lifecycle

use anyhow::Result;
use clap::Subcommand;
use rb_core::id::RunnerKeyId;

use crate::client::BrokerClient;
use crate::output::{format_time_ago, OutputFormat};

#[derive(Subcommand)]
pub enum KeysCommand {
    /// Issue a new runner key. The plaintext secret is shown once.
    Issue {
        /// Human-readable label, e.g. a hostname.
        name: String,
    },
    /// List keys owned by the caller.
    List,
    /// Revoke a key. Idempotent: revoking twice succeeds.
    Revoke {
        id: String,
    },
}

pub async fn handle(client: &BrokerClient, command: KeysCommand, format: OutputFormat) -> Result<()> {
    match command {
        KeysCommand::Issue { name } => {
            let issued = client.issue_runner_key(name).await?;
            crate::output::print(format, &issued, |issued| {
                println!("Issued key {} ({})", issued.id, issued.name);
                println!("Secret (shown once): {}", issued.secret);
            })?;
        }
        KeysCommand::List => {
            let keys = client.list_runner_keys().await?;
            crate::output::print(format, &keys, |resp| {
                if resp.keys.is_empty() {
                    println!("No runner keys");
                    return;
                }
                for k in &resp.keys {
                    let status = if k.revoked_at_ms.is_some() { "revoked" } else { "active" };
                    println!(
                        "{}  {:<20}  {}...  {}  last used {}",
                        k.id,
                        k.name,
                        k.key_prefix,
                        status,
                        k.last_used_at_ms.map(format_time_ago).unwrap_or_else(|| "never".into()),
                    );
                }
            })?;
        }
        KeysCommand::Revoke { id } => {
            client.revoke_runner_key(RunnerKeyId::from(id.clone())).await?;
            println!("Revoked {id}");
        }
    }
    Ok(())
}
