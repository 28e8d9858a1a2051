// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! `Project` record — the fields of a project owned by the core.
//!
//! Everything else about a project (name, source, chat history) lives
//! outside this crate's scope; only the fields the broker itself reads or
//! writes are modeled here.

use serde::{Deserialize, Serialize};

use crate::id::{ProjectId, RunnerId};

/// Lifecycle status of a project's dev server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DevServerStatus {
    Stopped,
    Starting,
    Running,
    Failed,
    Restarting,
    Stopping,
}

impl Default for DevServerStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

/// Project fields owned by the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: ProjectId,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_id: Option<RunnerId>,
    #[serde(default)]
    pub dev_server_status: DevServerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_server_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_server_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Opaque, broker-agnostic JSON blob owned by the higher-level UI layer.
    #[serde(default)]
    pub generation_state: serde_json::Value,
    pub last_activity_at_ms: u64,
}

impl Project {
    pub fn new(id: ProjectId, slug: impl Into<String>, now_ms: u64) -> Self {
        Self {
            id,
            slug: slug.into(),
            runner_id: None,
            dev_server_status: DevServerStatus::Stopped,
            dev_server_port: None,
            dev_server_pid: None,
            tunnel_url: None,
            error_message: None,
            generation_state: serde_json::Value::Null,
            last_activity_at_ms: now_ms,
        }
    }

    /// Invariant (i): when running, a port must be set.
    pub fn invariants_hold(&self) -> bool {
        if self.dev_server_status == DevServerStatus::Running {
            return self.dev_server_port.is_some();
        }
        true
    }
}
