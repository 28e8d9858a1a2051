// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Build executor: drives an agent provider's frame
//! stream and transforms it into the canonical event stream the broker
//! forwards to the UI.
//!
//! The provider interface is a pull-based async sequence rather than a
//! callback — matching how the reference system describes "await
//! streaming iterator": `next()` returns a future, and dropping the
//! stream is how cancellation propagates.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rb_wire::{CanonicalStreamEvent, TodoItem};
#[cfg(test)]
use rb_wire::TodoStatus;
use serde::Deserialize;

use crate::error::BuildExecutorError;

/// One frame out of an agent provider's response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderFrame {
    TextDelta { message_id: String, delta: String },
    MessageEnd { message_id: String },
    ToolCallStart { tool_call_id: String, tool_name: String, input: serde_json::Value },
    ToolCallResult { tool_call_id: String, output: serde_json::Value },
    CommandStart { command: String },
    CommandComplete { command: String, output: String, exit_code: i32, status: String },
    Result { summary: String },
    Failed { error: String, stack: Option<String> },
}

/// A pull-based provider stream.
#[async_trait]
pub trait ProviderStream: Send {
    async fn next(&mut self) -> Result<Option<ProviderFrame>, BuildExecutorError>;
}

/// Accumulates per-build state (message boundaries, todo list) while
/// transforming one provider's frames into canonical events.
pub struct BuildTransformer {
    cwd: PathBuf,
    workspace_parent: PathBuf,
    open_message_id: Option<String>,
    todos: Vec<TodoItem>,
}

impl BuildTransformer {
    pub fn new(cwd: PathBuf, workspace_parent: PathBuf) -> Self {
        Self { cwd, workspace_parent, open_message_id: None, todos: Vec::new() }
    }

    pub fn todos(&self) -> &[TodoItem] {
        &self.todos
    }

    /// Transform one provider frame into zero or more canonical events —
    /// a pure function plus the message/todo accumulator threaded through
    /// `self`.
    pub fn transform(&mut self, frame: ProviderFrame) -> Vec<CanonicalStreamEvent> {
        match frame {
            ProviderFrame::TextDelta { message_id, delta } => {
                let mut events = Vec::new();
                if self.open_message_id.as_deref() != Some(message_id.as_str()) {
                    if let Some(previous) = self.open_message_id.take() {
                        events.push(CanonicalStreamEvent::TextEnd { message_id: previous });
                    }
                    events.push(CanonicalStreamEvent::TextStart { message_id: message_id.clone() });
                    self.open_message_id = Some(message_id.clone());
                }
                events.push(CanonicalStreamEvent::TextDelta { message_id, delta });
                events
            }
            ProviderFrame::MessageEnd { message_id } => {
                if self.open_message_id.as_deref() == Some(message_id.as_str()) {
                    self.open_message_id = None;
                }
                vec![CanonicalStreamEvent::TextEnd { message_id }]
            }
            ProviderFrame::ToolCallStart { tool_call_id, tool_name, input } => {
                let mut events = vec![CanonicalStreamEvent::ToolInputAvailable {
                    tool_call_id: tool_call_id.clone(),
                    tool_name,
                    input: input.clone(),
                }];
                if let Some(path) = extract_path_argument(&input) {
                    if let Some(warning) = self.path_safety_check(&tool_call_id, &path) {
                        events.push(warning);
                    }
                }
                events
            }
            ProviderFrame::ToolCallResult { tool_call_id, output } => {
                let mut events = vec![CanonicalStreamEvent::ToolOutputAvailable {
                    tool_call_id: tool_call_id.clone(),
                    output: output.clone(),
                }];
                if let Some(text) = output.as_str() {
                    events.extend(self.extract_todo_write_markers(text));
                }
                events
            }
            ProviderFrame::CommandStart { command } => vec![CanonicalStreamEvent::CommandStart { command }],
            ProviderFrame::CommandComplete { command, output, exit_code, status } => {
                vec![CanonicalStreamEvent::CommandComplete { command, output, exit_code, status }]
            }
            ProviderFrame::Result { .. } | ProviderFrame::Failed { .. } => {
                let mut events = Vec::new();
                if let Some(message_id) = self.open_message_id.take() {
                    events.push(CanonicalStreamEvent::Finish { message_id });
                }
                events
            }
        }
    }

    /// Path-safety check: absolute paths outside the
    /// project's `cwd`/workspace parent, or containing a `/Desktop/`
    /// segment, warn but never block.
    fn path_safety_check(&self, tool_call_id: &str, path: &str) -> Option<CanonicalStreamEvent> {
        let candidate = Path::new(path);
        if path.contains("/Desktop/") {
            return Some(CanonicalStreamEvent::PathWarning {
                tool_call_id: tool_call_id.to_string(),
                path: path.to_string(),
                reason: "path contains a /Desktop/ segment".into(),
            });
        }
        if candidate.is_absolute()
            && !candidate.starts_with(&self.cwd)
            && !candidate.starts_with(&self.workspace_parent)
        {
            return Some(CanonicalStreamEvent::PathWarning {
                tool_call_id: tool_call_id.to_string(),
                path: path.to_string(),
                reason: "absolute path outside the project workspace".into(),
            });
        }
        None
    }

    /// `TODO_WRITE:{...}` markers in tool output are re-emitted as a
    /// synthetic `tool-input-available` for a `TodoWrite` tool, and fold
    /// into the per-build todo accumulator.
    /// Legacy inline todo text elsewhere in assistant messages is never
    /// sourced — only explicit `TodoWrite` markers populate `self.todos`.
    fn extract_todo_write_markers(&mut self, text: &str) -> Vec<CanonicalStreamEvent> {
        const MARKER: &str = "TODO_WRITE:";
        let mut events = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find(MARKER) {
            let json_start = &rest[start + MARKER.len()..];
            let Some((value, consumed)) = parse_leading_json_object(json_start) else { break };
            if let Ok(payload) = serde_json::from_value::<TodoWritePayload>(value.clone()) {
                self.todos = payload.todos.clone();
                events.push(CanonicalStreamEvent::ToolInputAvailable {
                    tool_call_id: format!("todo-write-{}", self.todos.len()),
                    tool_name: "TodoWrite".into(),
                    input: value,
                });
            }
            rest = &json_start[consumed..];
        }
        events
    }
}

#[derive(Debug, Deserialize)]
struct TodoWritePayload {
    todos: Vec<TodoItem>,
}

/// Scan `text` for the first balanced `{...}` object starting at byte 0,
/// returning the parsed value and how many bytes it consumed.
fn parse_leading_json_object(text: &str) -> Option<(serde_json::Value, usize)> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[..=i];
                    return serde_json::from_str(candidate).ok().map(|v| (v, i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_path_argument(input: &serde_json::Value) -> Option<String> {
    input.get("path").and_then(|v| v.as_str()).map(str::to_string)
}

/// Drive `provider` to completion, feeding every frame through `on_event`.
/// Returns the final build outcome.
pub async fn run_build(
    mut provider: Box<dyn ProviderStream>,
    transformer: &mut BuildTransformer,
    mut on_event: impl FnMut(CanonicalStreamEvent),
) -> Result<BuildOutcome, BuildExecutorError> {
    loop {
        let frame = provider.next().await?;
        let Some(frame) = frame else {
            return Ok(BuildOutcome::Failed {
                error: "provider stream ended without a terminal frame".into(),
                stack: None,
            });
        };
        let terminal = match &frame {
            ProviderFrame::Result { summary } => {
                Some(BuildOutcome::Completed { summary: summary.clone(), todos: transformer.todos().to_vec() })
            }
            ProviderFrame::Failed { error, stack } => {
                Some(BuildOutcome::Failed { error: error.clone(), stack: stack.clone() })
            }
            _ => None,
        };
        for event in transformer.transform(frame) {
            on_event(event);
        }
        if let Some(outcome) = terminal {
            return Ok(outcome);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Completed { summary: String, todos: Vec<TodoItem> },
    Failed { error: String, stack: Option<String> },
}
