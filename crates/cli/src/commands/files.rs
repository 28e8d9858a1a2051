// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! `rb files delete` - recursively delete a project's workspace directory
//! on its bound (or rerouted) runner.

use anyhow::Result;
use rb_core::id::ProjectId;

use crate::client::BrokerClient;
use crate::output::OutputFormat;

pub async fn handle_delete(client: &BrokerClient, project: String, format: OutputFormat) -> Result<()> {
    let response = client.delete_project_files(ProjectId::from(project)).await?;
    crate::output::print(format, &response, |r| {
        println!("Deleted on runner {}", r.routed_to_runner_id);
        if r.files_may_remain_on_original_runner {
            println!("Warning: the project's prior runner was unreachable; files may remain there.");
        }
    })?;
    Ok(())
}
