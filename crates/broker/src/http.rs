// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The broker's HTTP control plane: thin `axum` handlers that
//! extract, call into the core broker logic, and map errors through the
//! taxonomy in `rb_core::ErrorKind` to a status code once, at this boundary.
//!
//! Session/auth issuance and project CRUD are owned by the outer UI layer;
//! every handler here trusts an already-authenticated caller identity
//! passed via the `x-user-id` header.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use rb_core::id::{ProjectId, RunnerId, RunnerKeyId, UserId};
use rb_wire::{
    ApiErrorBody, Command, CommandBody, DeleteProjectFilesResponse, IssueRunnerKeyRequest,
    IssueRunnerKeyResponse, ListRunnerKeysResponse, RegisterProcessRequest, RunnerCommandAccepted,
    RunnerCommandRequest, RunnerConnectionStatus, RunnerKeySummary, RunnerStatusResponse,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::BrokerError;
use crate::BrokerState;

pub fn router(state: Arc<BrokerState>) -> Router {
    Router::new()
        .route("/runner/command", post(post_runner_command))
        .route("/runner/status", get(get_runner_status))
        .route("/runner/process/register", post(post_register_process))
        .route("/runner/process/:project_id", delete(delete_runner_process))
        .route("/runner-keys", post(post_issue_runner_key).get(get_list_runner_keys))
        .route("/runner-keys/:id", delete(delete_runner_key))
        .route("/projects/:id/start", post(post_start_project))
        .route("/project/:id/files", delete(delete_project_files))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

struct ApiError(BrokerError);

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ApiErrorBody { error: self.0.to_string(), code: kind.code().to_string() };
        (status, Json(body)).into_response()
    }
}

/// Caller identity trusted from the upstream session layer. Missing or
/// malformed `x-user-id` is `Unauthorized`, not a 500 — this boundary
/// never guesses at who's asking.
fn caller_user_id(headers: &HeaderMap) -> Result<UserId, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(UserId::from)
        .ok_or_else(|| ApiError(BrokerError::Unauthorized))
}

async fn post_runner_command(
    State(state): State<Arc<BrokerState>>,
    Json(req): Json<RunnerCommandRequest>,
) -> Result<Json<RunnerCommandAccepted>, ApiError> {
    state.binding.bind_or_verify(req.project_id, req.runner_id).await?;

    let now_ms = state.clock.epoch_ms();
    let command = Command::new(req.project_id, now_ms, req.command);
    let command_id = command.id;
    state.dispatcher.send(req.runner_id, command).await?;
    Ok(Json(RunnerCommandAccepted { ok: true, command_id }))
}

async fn get_runner_status(State(state): State<Arc<BrokerState>>) -> Result<Json<RunnerStatusResponse>, ApiError> {
    let mut connections = Vec::new();
    for conn in state.registry.list() {
        let (last_used_at_ms, revoked_at_ms) = match conn.key_id {
            Some(key_id) => match state.runner_keys.find_by_id(&key_id).await? {
                Some(key) => (key.last_used_at_ms, key.revoked_at_ms),
                None => (None, None),
            },
            None => (None, None),
        };
        connections.push(RunnerConnectionStatus {
            runner_id: conn.runner_id,
            user_id: conn.user_id,
            last_used_at_ms,
            revoked_at_ms,
            attached_at_ms: conn.attached_at_ms,
            last_heartbeat_at_ms: conn.last_heartbeat_at_ms(),
        });
    }
    Ok(Json(RunnerStatusResponse { connections }))
}

async fn post_register_process(
    State(state): State<Arc<BrokerState>>,
    Json(req): Json<RegisterProcessRequest>,
) -> Result<StatusCode, ApiError> {
    state.binding.bind_or_verify(req.project_id, req.runner_id).await?;
    state
        .processes
        .register(rb_core::RunningProcess {
            project_id: req.project_id,
            pid: req.pid,
            command: req.command,
            port: Some(req.port),
            runner_id: Some(req.runner_id),
            started_at_ms: req.started_at_ms,
            health_check_fail_count: 0,
        })
        .await?;
    Ok(StatusCode::CREATED)
}

async fn delete_runner_process(
    State(state): State<Arc<BrokerState>>,
    Path(project_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let project_id = ProjectId::from(project_id);
    state.processes.unregister(&project_id).await?;
    // Port-release failures are logged, never fail the unregister (spec §7).
    if let Err(e) = state.ports.release(&project_id).await {
        tracing::warn!(%project_id, error = %e, "port release failed during process unregister");
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn post_issue_runner_key(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Json(req): Json<IssueRunnerKeyRequest>,
) -> Result<Json<IssueRunnerKeyResponse>, ApiError> {
    let user_id = caller_user_id(&headers)?;
    let issued = state.keys.issue(user_id, req.name.clone()).await?;
    Ok(Json(IssueRunnerKeyResponse {
        id: issued.id,
        name: req.name,
        secret: issued.plaintext,
        key_prefix: issued.key_prefix,
    }))
}

async fn get_list_runner_keys(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
) -> Result<Json<ListRunnerKeysResponse>, ApiError> {
    let user_id = caller_user_id(&headers)?;
    let keys = state
        .keys
        .list(&user_id)
        .await?
        .into_iter()
        .map(|k| RunnerKeySummary {
            id: k.id,
            name: k.name,
            key_prefix: k.key_prefix,
            created_at_ms: k.created_at_ms,
            last_used_at_ms: k.last_used_at_ms,
            revoked_at_ms: k.revoked_at_ms,
        })
        .collect();
    Ok(Json(ListRunnerKeysResponse { keys }))
}

async fn delete_runner_key(
    State(state): State<Arc<BrokerState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.keys.revoke(&RunnerKeyId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start (or restart) a project's dev server on its bound runner. The
/// request body is a `start-dev-server` command payload; the target
/// runner is resolved from the existing binding, not from the caller.
async fn post_start_project(
    State(state): State<Arc<BrokerState>>,
    Path(id): Path<String>,
    Json(body): Json<CommandBody>,
) -> Result<Json<RunnerCommandAccepted>, ApiError> {
    if !matches!(body, CommandBody::StartDevServer { .. }) {
        return Err(ApiError(BrokerError::Validation("expected a start-dev-server command body".into())));
    }
    let project_id = ProjectId::from(id);
    let runner_id = state
        .binding
        .bound_runner(&project_id)
        .await?
        .ok_or_else(|| BrokerError::NotFound(format!("no runner bound for project {project_id}")))?;

    let now_ms = state.clock.epoch_ms();
    let command = Command::new(project_id, now_ms, body);
    let command_id = command.id;
    state.dispatcher.send(runner_id, command).await?;
    Ok(Json(RunnerCommandAccepted { ok: true, command_id }))
}

async fn delete_project_files(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DeleteProjectFilesResponse>, ApiError> {
    let user_id = caller_user_id(&headers)?;
    let project_id = ProjectId::from(id);
    let (runner_id, rerouted) =
        state.binding.resolve_for_delete(&project_id, user_id, &state.registry).await?;

    let now_ms = state.clock.epoch_ms();
    let command = Command::new(project_id, now_ms, CommandBody::DeleteProjectFiles);
    state.dispatcher.send(runner_id, command).await?;

    Ok(Json(DeleteProjectFilesResponse {
        ok: true,
        routed_to_runner_id: runner_id,
        files_may_remain_on_original_runner: rerouted,
    }))
}
