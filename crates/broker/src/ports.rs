// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Port allocator: reserves a TCP port per project, persists it so
//! reconnects pick the same port, and reclaims abandoned reservations.

use std::sync::Arc;

use rb_core::id::ProjectId;
use rb_core::{Clock, PortAllocation};
use rb_storage::{PortAllocationRepository, RunningProcessRepository};

use crate::error::BrokerError;

pub struct PortAllocator {
    repo: Arc<dyn PortAllocationRepository>,
    processes: Arc<dyn RunningProcessRepository>,
    clock: Arc<dyn Clock>,
    low: u16,
    high: u16,
    abandonment_ttl: std::time::Duration,
}

impl PortAllocator {
    pub fn new(
        repo: Arc<dyn PortAllocationRepository>,
        processes: Arc<dyn RunningProcessRepository>,
        clock: Arc<dyn Clock>,
        low: u16,
        high: u16,
        abandonment_ttl: std::time::Duration,
    ) -> Self {
        Self { repo, processes, clock, low, high, abandonment_ttl }
    }

    /// Reserve a port for `project_id`, returning the existing reservation's
    /// port if one is already live. Returns `None` if the range is exhausted.
    pub async fn reserve_for(
        &self,
        project_id: ProjectId,
        preferred: Option<u16>,
    ) -> Result<Option<u16>, BrokerError> {
        if let Some(existing) = self.repo.active_for_project(&project_id).await? {
            return Ok(Some(existing.port));
        }

        let mut candidates: Vec<u16> = Vec::new();
        if let Some(p) = preferred.filter(|p| (self.low..=self.high).contains(p)) {
            candidates.push(p);
        }
        candidates.extend((self.low..=self.high).filter(|p| Some(*p) != preferred));

        for port in candidates {
            if self.repo.is_port_reserved(port).await? {
                continue;
            }
            if !port_is_free(port) {
                continue;
            }
            self.repo
                .reserve(PortAllocation {
                    project_id,
                    port,
                    reserved_at_ms: self.clock.epoch_ms(),
                    released_at_ms: None,
                })
                .await?;
            return Ok(Some(port));
        }
        Ok(None)
    }

    /// Idempotent: releasing an already-released (or never-reserved)
    /// project is a no-op.
    pub async fn release(&self, project_id: &ProjectId) -> Result<(), BrokerError> {
        self.repo.release(project_id, self.clock.epoch_ms()).await?;
        Ok(())
    }

    /// The port of `project_id`'s current unreleased reservation, if any.
    pub async fn active_port_for(&self, project_id: &ProjectId) -> Result<Option<u16>, BrokerError> {
        Ok(self.repo.active_for_project(project_id).await?.map(|a| a.port))
    }

    /// Reclaim reservations whose project has no active `RunningProcess`
    /// and whose age exceeds the abandonment TTL. Called on startup and on
    /// a timer.
    pub async fn sweep(&self, project_ids: &[ProjectId]) -> Result<usize, BrokerError> {
        let now = self.clock.epoch_ms();
        let ttl_ms = self.abandonment_ttl.as_millis() as u64;
        let mut reclaimed = 0;
        for project_id in project_ids {
            let Some(allocation) = self.repo.active_for_project(project_id).await? else {
                continue;
            };
            if now.saturating_sub(allocation.reserved_at_ms) < ttl_ms {
                continue;
            }
            if self.processes.get(project_id).await?.is_some() {
                continue;
            }
            self.repo.release(project_id, now).await?;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }
}

/// Best-effort liveness probe: bind-and-drop on loopback. A port already
/// held by some other process on the host fails the bind and is skipped,
/// mirroring the reference process supervisor's own health checks (never
/// fatal, just a signal to try the next candidate).
fn port_is_free(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rb_core::FakeClock;
    use rb_storage::{MemoryPortAllocationRepository, MemoryRunningProcessRepository};

    fn allocator(low: u16, high: u16, ttl_ms: u64) -> (PortAllocator, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new());
        let allocator = PortAllocator::new(
            Arc::new(MemoryPortAllocationRepository::default()),
            Arc::new(MemoryRunningProcessRepository::default()),
            clock.clone(),
            low,
            high,
            std::time::Duration::from_millis(ttl_ms),
        );
        (allocator, clock)
    }

    #[tokio::test]
    async fn reserve_for_is_sticky_across_repeated_calls() {
        let (allocator, _clock) = allocator(3001, 3002, 1000);
        let project_id = ProjectId::new();
        let first = allocator.reserve_for(project_id, None).await.unwrap();
        let second = allocator.reserve_for(project_id, None).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn reserve_for_exhausted_range_returns_none() {
        let (allocator, _clock) = allocator(3001, 3001, 1000);
        allocator.reserve_for(ProjectId::new(), None).await.unwrap();
        let none = allocator.reserve_for(ProjectId::new(), None).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn release_then_reserve_may_pick_a_different_port() {
        let (allocator, _clock) = allocator(3001, 3002, 1000);
        let project_id = ProjectId::new();
        allocator.reserve_for(project_id, Some(3001)).await.unwrap();
        allocator.release(&project_id).await.unwrap();
        allocator.release(&project_id).await.unwrap(); // idempotent

        let reserved = allocator.reserve_for(project_id, None).await.unwrap();
        assert!(reserved.is_some());
    }

    #[tokio::test]
    async fn sweep_reclaims_only_stale_unowned_reservations() {
        let (allocator, clock) = allocator(3001, 3005, 1_000);
        let stale = ProjectId::new();
        let fresh = ProjectId::new();
        allocator.reserve_for(stale, None).await.unwrap();
        clock.advance(std::time::Duration::from_millis(2_000));
        allocator.reserve_for(fresh, None).await.unwrap();

        let reclaimed = allocator.sweep(&[stale, fresh]).await.unwrap();
        assert_eq!(reclaimed, 1);
    }

    proptest::proptest! {
        /// However many distinct projects ask for a port in the same small
        /// range, each reservation lands inside `[low, high]` and no two
        /// live projects ever share a port.
        #[test]
        fn reservations_stay_in_range_and_never_collide(project_count in 1usize..8) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (allocator, _clock) = allocator(3001, 3001 + 7, 60_000);
                let mut seen = std::collections::HashSet::new();
                for _ in 0..project_count {
                    let port = allocator.reserve_for(ProjectId::new(), None).await.unwrap();
                    if let Some(port) = port {
                        prop_assert!((3001..=3008).contains(&port));
                        prop_assert!(seen.insert(port), "port {port} reserved twice");
                    }
                }
                Ok(())
            })?;
        }
    }
}
