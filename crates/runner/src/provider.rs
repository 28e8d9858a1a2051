// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The concrete provider stream: spawns an external agent
//! binary and reads its stdout as newline-delimited JSON frames.
//!
//! The provider is treated as opaque — any AI agent behind a pull-based
//! `next()` — so this adapter only needs to know the wire shape of one
//! NDJSON line, not anything about what produced it. A future provider
//! backed by a persistent sidecar process would implement the same
//! [`ProviderStream`] trait without touching [`crate::build`].

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::warn;

use crate::build::{ProviderFrame, ProviderStream};
use crate::error::BuildExecutorError;

/// One NDJSON line from the provider binary's stdout, tagged the same way
/// as the rest of the wire protocol.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ProviderLine {
    TextDelta { message_id: String, delta: String },
    MessageEnd { message_id: String },
    ToolCallStart { tool_call_id: String, tool_name: String, input: serde_json::Value },
    ToolCallResult { tool_call_id: String, output: serde_json::Value },
    CommandStart { command: String },
    CommandComplete { command: String, output: String, exit_code: i32, status: String },
    Result { summary: String },
    Failed { error: String, stack: Option<String> },
}

impl From<ProviderLine> for ProviderFrame {
    fn from(line: ProviderLine) -> Self {
        match line {
            ProviderLine::TextDelta { message_id, delta } => ProviderFrame::TextDelta { message_id, delta },
            ProviderLine::MessageEnd { message_id } => ProviderFrame::MessageEnd { message_id },
            ProviderLine::ToolCallStart { tool_call_id, tool_name, input } => {
                ProviderFrame::ToolCallStart { tool_call_id, tool_name, input }
            }
            ProviderLine::ToolCallResult { tool_call_id, output } => {
                ProviderFrame::ToolCallResult { tool_call_id, output }
            }
            ProviderLine::CommandStart { command } => ProviderFrame::CommandStart { command },
            ProviderLine::CommandComplete { command, output, exit_code, status } => {
                ProviderFrame::CommandComplete { command, output, exit_code, status }
            }
            ProviderLine::Result { summary } => ProviderFrame::Result { summary },
            ProviderLine::Failed { error, stack } => ProviderFrame::Failed { error, stack },
        }
    }
}

/// Spawns `provider_binary` with the build prompt and reads its stdout as
/// one [`ProviderFrame`] per line.
pub struct CliProviderStream {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl CliProviderStream {
    /// Spawn the provider binary in `cwd`, passing `prompt` as its sole
    /// positional argument. Stderr is left connected to this process's own
    /// stderr so provider diagnostics still reach the runner's logs.
    pub async fn spawn(provider_binary: &str, prompt: &str, cwd: PathBuf) -> Result<Self, BuildExecutorError> {
        let mut command = Command::new(provider_binary);
        command
            .arg(prompt)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = command
            .spawn()
            .map_err(|e| BuildExecutorError::ProviderFailed(format!("failed to spawn provider: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BuildExecutorError::ProviderFailed("provider has no stdout pipe".into()))?;
        Ok(Self { child, lines: BufReader::new(stdout).lines() })
    }
}

#[async_trait]
impl ProviderStream for CliProviderStream {
    async fn next(&mut self) -> Result<Option<ProviderFrame>, BuildExecutorError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| BuildExecutorError::ProviderFailed(format!("reading provider stdout: {e}")))?;
            let Some(line) = line else {
                let status = self.child.wait().await;
                return match status {
                    Ok(status) if status.success() => Ok(None),
                    Ok(status) => Err(BuildExecutorError::ProviderFailed(format!("provider exited with {status}"))),
                    Err(e) => Err(BuildExecutorError::ProviderFailed(format!("waiting on provider: {e}"))),
                };
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ProviderLine>(&line) {
                Ok(parsed) => return Ok(Some(parsed.into())),
                Err(e) => {
                    warn!(%line, error = %e, "skipping unparseable provider line");
                    continue;
                }
            }
        }
    }
}
