// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Runner → broker event frames.

use rb_core::id::{CommandId, ProjectId};
use serde::{Deserialize, Serialize};

/// A runner → broker event. `command_id` is present for anything produced
/// while executing a specific command; `project_id` is present for
/// anything tied to a project's lifecycle (port/tunnel/process events).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub body: EventBody,
}

impl RunnerEvent {
    pub fn for_command(command_id: CommandId, timestamp_ms: u64, body: EventBody) -> Self {
        Self { command_id: Some(command_id), project_id: None, timestamp_ms, body }
    }

    pub fn for_project(project_id: ProjectId, timestamp_ms: u64, body: EventBody) -> Self {
        Self { command_id: None, project_id: Some(project_id), timestamp_ms, body }
    }

    /// True for events that close the subscription after delivery.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.body,
            EventBody::BuildCompleted { .. } | EventBody::BuildFailed { .. } | EventBody::Error { .. }
        )
    }
}

/// The `RunnerEventType` tagged union.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventBody {
    Ack,
    LogChunk {
        stream: LogStream,
        cursor: u64,
        data: String,
    },
    PortDetected {
        port: u16,
    },
    TunnelCreated {
        port: u16,
        url: String,
    },
    TunnelClosed {
        port: u16,
    },
    ProcessExited {
        exit_code: Option<i32>,
        signal: Option<i32>,
        duration_ms: u64,
        quick_exit: bool,
    },
    BuildProgress {
        message: String,
    },
    BuildStream {
        frame: CanonicalStreamEvent,
    },
    BuildCompleted {
        summary: String,
        todos: Vec<TodoItem>,
    },
    BuildFailed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    RunnerStatus {
        version: String,
        platform: String,
    },
    ProjectMetadata {
        key: String,
        value: serde_json::Value,
    },
    FilesDeleted {
        rerouted_to_runner: bool,
    },
    FileContent {
        path: std::path::PathBuf,
        content: String,
    },
    FileWritten {
        path: std::path::PathBuf,
    },
    FileList {
        entries: Vec<String>,
    },
    Error {
        message: String,
    },
}

/// Which child-process stream a log chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// A todo item emitted via an explicit `TodoWrite` tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

/// The canonical protocol-transformed stream produced by the build executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CanonicalStreamEvent {
    TextStart {
        message_id: String,
    },
    TextDelta {
        message_id: String,
        delta: String,
    },
    TextEnd {
        message_id: String,
    },
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolOutputAvailable {
        tool_call_id: String,
        output: serde_json::Value,
    },
    /// Path-safety warning: surfaced, never blocking.
    PathWarning {
        tool_call_id: String,
        path: String,
        reason: String,
    },
    CommandStart {
        command: String,
    },
    CommandComplete {
        command: String,
        output: String,
        exit_code: i32,
        status: String,
    },
    Finish {
        message_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_detected_round_trips() {
        let ev = RunnerEvent::for_project(
            ProjectId::new(),
            42,
            EventBody::PortDetected { port: 3001 },
        );
        let json = serde_json::to_string(&ev).expect("serialize");
        let back: RunnerEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(ev, back);
    }

    #[test]
    fn terminal_events_are_flagged() {
        let build_failed = RunnerEvent::for_command(
            CommandId::new(),
            0,
            EventBody::BuildFailed { error: "boom".into(), stack: None },
        );
        assert!(build_failed.is_terminal());

        let progress =
            RunnerEvent::for_command(CommandId::new(), 0, EventBody::BuildProgress { message: "x".into() });
        assert!(!progress.is_terminal());
    }
}
