// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! `RunnerKey` record — the persisted half of a runner's bearer secret.
//!
//! The plaintext token is never stored; only a keyed hash and a short
//! display prefix survive creation. Hashing and plaintext generation live
//! in `rb-broker::keys` (the component that owns the policy); this type is
//! the pure data shape shared with the storage layer.

use serde::{Deserialize, Serialize};

use crate::id::{RunnerKeyId, UserId};

/// A runner-key record as persisted by the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunnerKey {
    pub id: RunnerKeyId,
    pub user_id: UserId,
    pub name: String,
    /// Keyed hash of the one-time plaintext token. Never reversible.
    pub key_hash: String,
    /// First few characters of the plaintext, kept for display ("sv_ab12...").
    pub key_prefix: String,
    pub created_at_ms: u64,
    pub last_used_at_ms: Option<u64>,
    pub revoked_at_ms: Option<u64>,
}

impl RunnerKey {
    pub fn is_active(&self) -> bool {
        self.revoked_at_ms.is_none()
    }
}
