// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! `PortAllocation` record — a project's reserved dev-server port.

use serde::{Deserialize, Serialize};

use crate::id::ProjectId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortAllocation {
    pub project_id: ProjectId,
    pub port: u16,
    pub reserved_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at_ms: Option<u64>,
}

impl PortAllocation {
    pub fn is_released(&self) -> bool {
        self.released_at_ms.is_some()
    }
}
