// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! In-process repository implementation: one `parking_lot::Mutex`-guarded
//! map per table, mirroring the reference daemon's in-process
//! `MaterializedState` pattern. The default local backend; a real
//! deployment swaps in SQLite or Postgres behind the same traits.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rb_core::id::{ProjectId, RunnerId, RunnerKeyId, UserId};
use rb_core::{PortAllocation, Project, RunnerKey, RunningProcess};

use crate::error::StorageError;
use crate::traits::{BindOutcome, PortAllocationRepository, ProjectRepository, RunnerKeyRepository, RunningProcessRepository};

#[derive(Debug, Default)]
pub struct MemoryRunnerKeyRepository {
    rows: Mutex<HashMap<RunnerKeyId, RunnerKey>>,
}

#[async_trait]
impl RunnerKeyRepository for MemoryRunnerKeyRepository {
    async fn insert(&self, key: RunnerKey) -> Result<(), StorageError> {
        self.rows.lock().insert(key.id, key);
        Ok(())
    }

    async fn find_by_id(&self, id: &RunnerKeyId) -> Result<Option<RunnerKey>, StorageError> {
        Ok(self.rows.lock().get(id).cloned())
    }

    async fn find_by_prefix(&self, key_prefix: &str) -> Result<Vec<RunnerKey>, StorageError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|k| k.key_prefix == key_prefix)
            .cloned()
            .collect())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<RunnerKey>, StorageError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|k| &k.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn revoke(&self, id: &RunnerKeyId, revoked_at_ms: u64) -> Result<(), StorageError> {
        if let Some(row) = self.rows.lock().get_mut(id) {
            row.revoked_at_ms = Some(revoked_at_ms);
        }
        Ok(())
    }

    async fn touch_last_used(&self, id: &RunnerKeyId, at_ms: u64) -> Result<(), StorageError> {
        if let Some(row) = self.rows.lock().get_mut(id) {
            row.last_used_at_ms = Some(at_ms);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryProjectRepository {
    rows: Mutex<HashMap<ProjectId, Project>>,
}

#[async_trait]
impl ProjectRepository for MemoryProjectRepository {
    async fn get(&self, id: &ProjectId) -> Result<Option<Project>, StorageError> {
        Ok(self.rows.lock().get(id).cloned())
    }

    async fn upsert(&self, project: Project) -> Result<(), StorageError> {
        self.rows.lock().insert(project.id, project);
        Ok(())
    }

    async fn bind_runner(
        &self,
        project_id: &ProjectId,
        runner_id: RunnerId,
    ) -> Result<BindOutcome, StorageError> {
        let mut rows = self.rows.lock();
        let Some(project) = rows.get_mut(project_id) else {
            return Ok(BindOutcome::Conflict(runner_id));
        };
        match project.runner_id {
            None => {
                project.runner_id = Some(runner_id);
                Ok(BindOutcome::Bound)
            }
            Some(existing) if existing == runner_id => Ok(BindOutcome::AlreadyBound),
            Some(existing) => Ok(BindOutcome::Conflict(existing)),
        }
    }

    async fn unbind_runner(&self, project_id: &ProjectId) -> Result<(), StorageError> {
        if let Some(project) = self.rows.lock().get_mut(project_id) {
            project.runner_id = None;
        }
        Ok(())
    }

    async fn delete(&self, id: &ProjectId) -> Result<(), StorageError> {
        self.rows.lock().remove(id);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRunningProcessRepository {
    rows: Mutex<HashMap<ProjectId, RunningProcess>>,
}

#[async_trait]
impl RunningProcessRepository for MemoryRunningProcessRepository {
    async fn register(&self, process: RunningProcess) -> Result<(), StorageError> {
        self.rows.lock().insert(process.project_id, process);
        Ok(())
    }

    async fn get(&self, project_id: &ProjectId) -> Result<Option<RunningProcess>, StorageError> {
        Ok(self.rows.lock().get(project_id).cloned())
    }

    async fn unregister(&self, project_id: &ProjectId) -> Result<Option<RunningProcess>, StorageError> {
        Ok(self.rows.lock().remove(project_id))
    }

    async fn list_for_runner(&self, runner_id: &RunnerId) -> Result<Vec<RunningProcess>, StorageError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|p| &p.runner_id == runner_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryPortAllocationRepository {
    /// One row per reservation, keyed by project; release sets
    /// `released_at_ms` rather than removing the row so reservation
    /// history survives release.
    rows: Mutex<HashMap<ProjectId, PortAllocation>>,
}

#[async_trait]
impl PortAllocationRepository for MemoryPortAllocationRepository {
    async fn reserve(&self, allocation: PortAllocation) -> Result<(), StorageError> {
        self.rows.lock().insert(allocation.project_id, allocation);
        Ok(())
    }

    async fn release(&self, project_id: &ProjectId, released_at_ms: u64) -> Result<(), StorageError> {
        if let Some(row) = self.rows.lock().get_mut(project_id) {
            if row.released_at_ms.is_none() {
                row.released_at_ms = Some(released_at_ms);
            }
        }
        Ok(())
    }

    async fn active_for_project(&self, project_id: &ProjectId) -> Result<Option<PortAllocation>, StorageError> {
        Ok(self
            .rows
            .lock()
            .get(project_id)
            .filter(|row| !row.is_released())
            .cloned())
    }

    async fn is_port_reserved(&self, port: u16) -> Result<bool, StorageError> {
        Ok(self
            .rows
            .lock()
            .values()
            .any(|row| row.port == port && !row.is_released()))
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
