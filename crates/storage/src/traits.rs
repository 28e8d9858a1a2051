// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Repository traits the broker persists `Project` / `RunningProcess` /
//! `PortAllocation` / `RunnerKey` rows through. A real deployment swaps
//! in a SQLite- or Postgres-backed implementation without touching
//! `rb-broker`; see [`crate::memory`] for the default local backend.

use async_trait::async_trait;
use rb_core::{PortAllocation, Project, RunnerKey, RunningProcess};
use rb_core::id::{ProjectId, RunnerId, RunnerKeyId, UserId};

use crate::error::StorageError;

/// Outcome of an atomic bind-if-unbound attempt. Binding a project is
/// monotonic: once set, a runner stays bound until explicitly unbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The project had no runner bound; it is now bound to the requested one.
    Bound,
    /// The project was already bound to the requested runner. No-op.
    AlreadyBound,
    /// The project is bound to a different runner. Not applied.
    Conflict(RunnerId),
}

#[async_trait]
pub trait RunnerKeyRepository: Send + Sync {
    async fn insert(&self, key: RunnerKey) -> Result<(), StorageError>;
    async fn find_by_id(&self, id: &RunnerKeyId) -> Result<Option<RunnerKey>, StorageError>;
    /// Candidates sharing `key_prefix`; the caller verifies the full secret
    /// hash against each candidate (prefixes are not unique by themselves).
    async fn find_by_prefix(&self, key_prefix: &str) -> Result<Vec<RunnerKey>, StorageError>;
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<RunnerKey>, StorageError>;
    async fn revoke(&self, id: &RunnerKeyId, revoked_at_ms: u64) -> Result<(), StorageError>;
    async fn touch_last_used(&self, id: &RunnerKeyId, at_ms: u64) -> Result<(), StorageError>;
}

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get(&self, id: &ProjectId) -> Result<Option<Project>, StorageError>;
    async fn upsert(&self, project: Project) -> Result<(), StorageError>;
    /// Atomically bind `project_id` to `runner_id` if currently unbound.
    /// This is the row-level-isolation seam the backing store must provide
    /// so two concurrent first-binds can't both win.
    async fn bind_runner(
        &self,
        project_id: &ProjectId,
        runner_id: RunnerId,
    ) -> Result<BindOutcome, StorageError>;
    async fn unbind_runner(&self, project_id: &ProjectId) -> Result<(), StorageError>;
    async fn delete(&self, id: &ProjectId) -> Result<(), StorageError>;
}

#[async_trait]
pub trait RunningProcessRepository: Send + Sync {
    async fn register(&self, process: RunningProcess) -> Result<(), StorageError>;
    async fn get(&self, project_id: &ProjectId) -> Result<Option<RunningProcess>, StorageError>;
    /// Idempotent: unregistering an absent row is not an error.
    async fn unregister(&self, project_id: &ProjectId) -> Result<Option<RunningProcess>, StorageError>;
    async fn list_for_runner(&self, runner_id: &RunnerId) -> Result<Vec<RunningProcess>, StorageError>;
}

#[async_trait]
pub trait PortAllocationRepository: Send + Sync {
    async fn reserve(&self, allocation: PortAllocation) -> Result<(), StorageError>;
    /// Idempotent: repeated release of the same project is a no-op
    /// after the first.
    async fn release(&self, project_id: &ProjectId, released_at_ms: u64) -> Result<(), StorageError>;
    async fn active_for_project(&self, project_id: &ProjectId) -> Result<Option<PortAllocation>, StorageError>;
    async fn is_port_reserved(&self, port: u16) -> Result<bool, StorageError>;
}
