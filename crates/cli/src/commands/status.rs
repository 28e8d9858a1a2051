// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! `rb status` - attached runner connections

use anyhow::Result;

use crate::client::BrokerClient;
use crate::output::{format_time_ago, OutputFormat};

pub async fn handle(client: &BrokerClient, format: OutputFormat) -> Result<()> {
    let status = client.runner_status().await?;
    crate::output::print(format, &status, |status| {
        if status.connections.is_empty() {
            println!("No runners attached");
            return;
        }
        for conn in &status.connections {
            println!(
                "{}  attached {}  last heartbeat {}",
                conn.runner_id,
                format_time_ago(conn.attached_at_ms),
                format_time_ago(conn.last_heartbeat_at_ms),
            );
        }
    })?;
    Ok(())
}
