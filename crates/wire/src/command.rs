// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Broker → runner command frames.

use std::collections::HashMap;
use std::path::PathBuf;

use rb_core::id::{CommandId, ProjectId};
use serde::{Deserialize, Serialize};

/// A broker → runner directive. Every command carries an `id`, a
/// `project_id`, and a `timestamp_ms`, plus a type-tagged payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub id: CommandId,
    pub project_id: ProjectId,
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub body: CommandBody,
}

impl Command {
    pub fn new(project_id: ProjectId, timestamp_ms: u64, body: CommandBody) -> Self {
        Self { id: CommandId::new(), project_id, timestamp_ms, body }
    }
}

/// The `RunnerCommandType` tagged union.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CommandBody {
    StartBuild {
        prompt: String,
        #[serde(default)]
        options: HashMap<String, String>,
    },
    StartDevServer {
        run_command: String,
        cwd: PathBuf,
        #[serde(default)]
        env: Vec<(String, String)>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preferred_port: Option<u16>,
    },
    StopDevServer,
    StartTunnel {
        port: u16,
    },
    StopTunnel {
        port: u16,
    },
    FetchLogs {
        #[serde(default)]
        since_cursor: Option<u64>,
    },
    RunnerHealthCheck,
    DeleteProjectFiles,
    ReadFile {
        path: PathBuf,
    },
    WriteFile {
        path: PathBuf,
        content: String,
    },
    ListFiles {
        path: PathBuf,
    },
}

impl CommandBody {
    /// The wire type tag, for logging ("received request" style lines).
    pub fn type_name(&self) -> &'static str {
        match self {
            CommandBody::StartBuild { .. } => "start-build",
            CommandBody::StartDevServer { .. } => "start-dev-server",
            CommandBody::StopDevServer => "stop-dev-server",
            CommandBody::StartTunnel { .. } => "start-tunnel",
            CommandBody::StopTunnel { .. } => "stop-tunnel",
            CommandBody::FetchLogs { .. } => "fetch-logs",
            CommandBody::RunnerHealthCheck => "runner-health-check",
            CommandBody::DeleteProjectFiles => "delete-project-files",
            CommandBody::ReadFile { .. } => "read-file",
            CommandBody::WriteFile { .. } => "write-file",
            CommandBody::ListFiles { .. } => "list-files",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_build_round_trips_through_json() {
        let cmd = Command::new(
            ProjectId::new(),
            1000,
            CommandBody::StartBuild { prompt: "Build a todo app".into(), options: HashMap::new() },
        );
        let json = serde_json::to_string(&cmd).expect("serialize");
        let back: Command = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(cmd, back);
        assert!(json.contains("\"type\":\"start-build\""));
    }

    #[test]
    fn type_name_matches_wire_tag() {
        assert_eq!(CommandBody::StopDevServer.type_name(), "stop-dev-server");
        assert_eq!(
            CommandBody::StartTunnel { port: 3001 }.type_name(),
            "start-tunnel"
        );
    }
}
