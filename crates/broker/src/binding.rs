// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Project↔runner binding: a project's `runnerId` is set on
//! the first successful build dispatched to a runner and is then monotonic
//! — every later command for that project must target the same runner.

use std::sync::Arc;

use rb_core::id::{ProjectId, RunnerId, UserId};
use rb_storage::{BindOutcome, ProjectRepository};

use crate::error::BrokerError;
use crate::registry::ConnectionRegistry;

pub struct ProjectBinding {
    projects: Arc<dyn ProjectRepository>,
}

impl ProjectBinding {
    pub fn new(projects: Arc<dyn ProjectRepository>) -> Self {
        Self { projects }
    }

    /// Atomically bind `project_id` to `runner_id` if unbound; reject with
    /// `Conflict` if bound to a different runner.
    pub async fn bind_or_verify(
        &self,
        project_id: ProjectId,
        runner_id: RunnerId,
    ) -> Result<(), BrokerError> {
        match self.projects.bind_runner(&project_id, runner_id).await? {
            BindOutcome::Bound | BindOutcome::AlreadyBound => Ok(()),
            BindOutcome::Conflict(bound_to) => Err(BrokerError::Conflict {
                project_id: project_id.to_string(),
                bound_to: bound_to.to_string(),
            }),
        }
    }

    pub async fn bound_runner(&self, project_id: &ProjectId) -> Result<Option<RunnerId>, BrokerError> {
        Ok(self.projects.get(project_id).await?.and_then(|p| p.runner_id))
    }

    /// Resolve which runner a `delete-project-files` command should target.
    ///
    /// If the bound runner is attached, use it. Otherwise fall back to any
    /// attached runner owned by `requesting_user_id` — the caller (the
    /// out-of-scope HTTP/UI layer) already verified `requesting_user_id`
    /// owns the project, so it is the scoping key for the fallback search.
    /// The second return value is `true` when a fallback runner was used,
    /// meaning files may remain on the original runner's disk.
    pub async fn resolve_for_delete(
        &self,
        project_id: &ProjectId,
        requesting_user_id: UserId,
        registry: &ConnectionRegistry,
    ) -> Result<(RunnerId, bool), BrokerError> {
        let project = self
            .projects
            .get(project_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("project {project_id}")))?;

        if let Some(bound) = project.runner_id {
            if registry.get(&bound).is_some() {
                return Ok((bound, false));
            }
        }

        let fallback = registry
            .list()
            .into_iter()
            .find(|conn| conn.user_id == Some(requesting_user_id))
            .ok_or(BrokerError::RunnerDisconnected)?;

        Ok((fallback.runner_id, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rb_core::Project;
    use rb_storage::MemoryProjectRepository;
    use tokio::sync::mpsc;

    fn binding() -> (ProjectBinding, Arc<MemoryProjectRepository>) {
        let repo = Arc::new(MemoryProjectRepository::default());
        (ProjectBinding::new(repo.clone()), repo)
    }

    #[tokio::test]
    async fn first_bind_succeeds_and_is_then_monotonic() {
        let (binding, repo) = binding();
        let project_id = ProjectId::new();
        repo.upsert(Project::new(project_id, "demo", 0)).await.unwrap();

        let r1 = RunnerId::new();
        let r2 = RunnerId::new();
        binding.bind_or_verify(project_id, r1).await.unwrap();
        binding.bind_or_verify(project_id, r1).await.unwrap();

        let err = binding.bind_or_verify(project_id, r2).await.unwrap_err();
        assert!(matches!(err, BrokerError::Conflict { .. }));
        assert_eq!(binding.bound_runner(&project_id).await.unwrap(), Some(r1));
    }

    #[tokio::test]
    async fn delete_uses_bound_runner_when_attached() {
        let (binding, repo) = binding();
        let project_id = ProjectId::new();
        let mut project = Project::new(project_id, "demo", 0);
        let bound = RunnerId::new();
        project.runner_id = Some(bound);
        repo.upsert(project).await.unwrap();

        let registry = ConnectionRegistry::default();
        let (tx, _rx) = mpsc::channel(8);
        registry.attach(Arc::new(crate::registry::RunnerConnection::new(bound, None, 0, tx)));

        let (resolved, rerouted) =
            binding.resolve_for_delete(&project_id, UserId::new(), &registry).await.unwrap();
        assert_eq!(resolved, bound);
        assert!(!rerouted);
    }

    #[tokio::test]
    async fn delete_falls_back_to_another_attached_runner_owned_by_the_same_user() {
        let (binding, repo) = binding();
        let project_id = ProjectId::new();
        let user_id = UserId::new();
        let mut project = Project::new(project_id, "demo", 0);
        let offline_runner = RunnerId::new();
        project.runner_id = Some(offline_runner);
        repo.upsert(project).await.unwrap();

        let registry = ConnectionRegistry::default();
        let fallback_runner = RunnerId::new();
        let (tx, _rx) = mpsc::channel(8);
        registry.attach(Arc::new(crate::registry::RunnerConnection::new(
            fallback_runner,
            Some(user_id),
            0,
            tx,
        )));

        let (resolved, rerouted) =
            binding.resolve_for_delete(&project_id, user_id, &registry).await.unwrap();
        assert_eq!(resolved, fallback_runner);
        assert!(rerouted);
    }

    #[tokio::test]
    async fn delete_with_no_attached_runner_for_the_user_fails() {
        let (binding, repo) = binding();
        let project_id = ProjectId::new();
        repo.upsert(Project::new(project_id, "demo", 0)).await.unwrap();

        let registry = ConnectionRegistry::default();
        let err = binding.resolve_for_delete(&project_id, UserId::new(), &registry).await.unwrap_err();
        assert!(matches!(err, BrokerError::RunnerDisconnected));
    }

    proptest::proptest! {
        /// Whatever order a sequence of runner ids calls `bind_or_verify`
        /// in, the project ends up bound to whichever one got there first,
        /// and every later call either succeeds as a no-op or sees `Conflict`.
        #[test]
        fn bind_is_monotonic_under_any_attempt_order(attempt_count in 2usize..10, first_pick in 0usize..10) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (binding, repo) = binding();
                let project_id = ProjectId::new();
                repo.upsert(Project::new(project_id, "demo", 0)).await.unwrap();

                let runners: Vec<RunnerId> = (0..attempt_count).map(|_| RunnerId::new()).collect();
                let first_pick = first_pick % attempt_count;
                let winner = runners[first_pick];
                binding.bind_or_verify(project_id, winner).await.unwrap();

                for &runner_id in &runners {
                    let result = binding.bind_or_verify(project_id, runner_id).await;
                    if runner_id == winner {
                        prop_assert!(result.is_ok());
                    } else {
                        prop_assert!(matches!(result, Err(BrokerError::Conflict { .. })));
                    }
                }
                prop_assert_eq!(binding.bound_runner(&project_id).await.unwrap(), Some(winner));
                Ok(())
            })?;
        }
    }
}
