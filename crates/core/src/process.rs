// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! `RunningProcess` record — the persisted handle to a project's
//! supervised dev-server child process.

use serde::{Deserialize, Serialize};

use crate::id::{ProjectId, RunnerId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunningProcess {
    pub project_id: ProjectId,
    pub pid: u32,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_id: Option<RunnerId>,
    pub started_at_ms: u64,
    #[serde(default)]
    pub health_check_fail_count: u32,
}
