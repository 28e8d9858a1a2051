use rb_core::id::{ProjectId, RunnerId, RunnerKeyId, UserId};
use rb_core::{PortAllocation, Project, RunnerKey};

use super::*;

fn key(user_id: UserId, prefix: &str) -> RunnerKey {
    RunnerKey {
        id: RunnerKeyId::new(),
        user_id,
        name: "laptop".into(),
        key_hash: "hash".into(),
        key_prefix: prefix.into(),
        created_at_ms: 0,
        last_used_at_ms: None,
        revoked_at_ms: None,
    }
}

#[tokio::test]
async fn runner_key_revoke_sets_timestamp_without_removing_row() {
    let repo = MemoryRunnerKeyRepository::default();
    let user_id = UserId::new();
    let k = key(user_id, "rk_abcd");
    let id = k.id;
    repo.insert(k).await.unwrap();

    repo.revoke(&id, 500).await.unwrap();
    let row = repo.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(row.revoked_at_ms, Some(500));
    assert!(!row.is_active());
}

#[tokio::test]
async fn runner_key_list_for_user_excludes_other_users() {
    let repo = MemoryRunnerKeyRepository::default();
    let user_a = UserId::new();
    let user_b = UserId::new();
    repo.insert(key(user_a, "rk_a")).await.unwrap();
    repo.insert(key(user_b, "rk_b")).await.unwrap();

    let rows = repo.list_for_user(&user_a).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, user_a);
}

#[tokio::test]
async fn project_bind_runner_is_monotonic() {
    let repo = MemoryProjectRepository::default();
    let project_id = ProjectId::new();
    repo.upsert(Project::new(project_id, "demo", 0)).await.unwrap();

    let r1 = RunnerId::new();
    let r2 = RunnerId::new();

    assert_eq!(repo.bind_runner(&project_id, r1).await.unwrap(), BindOutcome::Bound);
    assert_eq!(
        repo.bind_runner(&project_id, r1).await.unwrap(),
        BindOutcome::AlreadyBound
    );
    assert_eq!(
        repo.bind_runner(&project_id, r2).await.unwrap(),
        BindOutcome::Conflict(r1)
    );

    let project = repo.get(&project_id).await.unwrap().unwrap();
    assert_eq!(project.runner_id, Some(r1));
}

#[tokio::test]
async fn project_bind_runner_against_missing_project_is_conflict() {
    let repo = MemoryProjectRepository::default();
    let outcome = repo.bind_runner(&ProjectId::new(), RunnerId::new()).await.unwrap();
    assert!(matches!(outcome, BindOutcome::Conflict(_)));
}

#[tokio::test]
async fn running_process_register_then_unregister_round_trips() {
    let repo = MemoryRunningProcessRepository::default();
    let project_id = ProjectId::new();
    let runner_id = RunnerId::new();
    let process = rb_core::RunningProcess {
        project_id,
        pid: 1234,
        command: "npm run dev".into(),
        port: 3001,
        runner_id,
        started_at_ms: 0,
        health_check_fail_count: 0,
    };
    repo.register(process.clone()).await.unwrap();
    assert!(repo.get(&project_id).await.unwrap().is_some());

    let removed = repo.unregister(&project_id).await.unwrap();
    assert_eq!(removed.unwrap().pid, 1234);
    assert!(repo.get(&project_id).await.unwrap().is_none());

    // Idempotent: a second unregister is not an error.
    assert!(repo.unregister(&project_id).await.unwrap().is_none());
}

#[tokio::test]
async fn port_release_is_idempotent_and_frees_the_port() {
    let repo = MemoryPortAllocationRepository::default();
    let project_id = ProjectId::new();
    repo.reserve(PortAllocation {
        project_id,
        port: 3001,
        reserved_at_ms: 0,
        released_at_ms: None,
    })
    .await
    .unwrap();

    assert!(repo.is_port_reserved(3001).await.unwrap());

    repo.release(&project_id, 10).await.unwrap();
    repo.release(&project_id, 20).await.unwrap();

    let row = repo.active_for_project(&project_id).await.unwrap();
    assert!(row.is_none());
    assert!(!repo.is_port_reserved(3001).await.unwrap());
}
