// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Test builders and proptest strategies shared across crates.
//!
//! Gated behind `test-support` so other crates' dev-dependencies can pull
//! this in without dragging `proptest` into production builds.

use crate::id::ProjectId;
use crate::port::PortAllocation;

/// Build a `PortAllocation` with sane defaults, overridable per-field.
pub struct PortAllocationBuilder {
    project_id: ProjectId,
    port: u16,
    reserved_at_ms: u64,
    released_at_ms: Option<u64>,
}

impl Default for PortAllocationBuilder {
    fn default() -> Self {
        Self { project_id: ProjectId::new(), port: 3001, reserved_at_ms: 0, released_at_ms: None }
    }
}

impl PortAllocationBuilder {
    pub fn project_id(mut self, id: ProjectId) -> Self {
        self.project_id = id;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn reserved_at_ms(mut self, ms: u64) -> Self {
        self.reserved_at_ms = ms;
        self
    }

    pub fn released(mut self, ms: u64) -> Self {
        self.released_at_ms = Some(ms);
        self
    }

    pub fn build(self) -> PortAllocation {
        PortAllocation {
            project_id: self.project_id,
            port: self.port,
            reserved_at_ms: self.reserved_at_ms,
            released_at_ms: self.released_at_ms,
        }
    }
}

#[cfg(feature = "proptest")]
pub mod strategies {
    use proptest::prelude::*;

    /// A plausible dev-server port within the allocator's configured range.
    pub fn port_strategy() -> impl Strategy<Value = u16> {
        3001u16..=4000u16
    }
}
