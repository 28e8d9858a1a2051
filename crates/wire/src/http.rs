// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response bodies for the broker's HTTP control plane.
//!
//! These are pure data shapes; the broker crate owns the axum routing and
//! the mapping from `rb_core::error::ErrorKind` to status codes.

use rb_core::id::{ProjectId, RunnerId, RunnerKeyId, UserId};
use serde::{Deserialize, Serialize};

use crate::command::CommandBody;

/// `POST /runner/command` request body: a command plus the runner it
/// targets. The broker derives `project_id` from `command`.
///
/// HTTP bodies use `camelCase` (the UI-facing boundary); the broker↔runner
/// wire frames in [`crate::command`] and [`crate::event`] stay `snake_case`
/// since both ends of that protocol are this workspace's own binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerCommandRequest {
    pub runner_id: RunnerId,
    pub project_id: ProjectId,
    #[serde(flatten)]
    pub command: CommandBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerCommandAccepted {
    pub ok: bool,
    pub command_id: rb_core::id::CommandId,
}

/// `GET /runner/status` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerStatusResponse {
    pub connections: Vec<RunnerConnectionStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConnectionStatus {
    pub runner_id: RunnerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at_ms: Option<u64>,
    pub attached_at_ms: u64,
    pub last_heartbeat_at_ms: u64,
}

/// `POST /runner/process/register` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterProcessRequest {
    pub project_id: ProjectId,
    pub runner_id: RunnerId,
    pub pid: u32,
    pub command: String,
    pub port: u16,
    pub started_at_ms: u64,
}

/// `POST /runner-keys` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRunnerKeyRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRunnerKeyResponse {
    pub id: RunnerKeyId,
    pub name: String,
    /// Returned once, at issuance time, never again.
    pub secret: String,
    pub key_prefix: String,
}

/// `GET /runner-keys` response entry — never includes the secret or hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerKeySummary {
    pub id: RunnerKeyId,
    pub name: String,
    pub key_prefix: String,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRunnerKeysResponse {
    pub keys: Vec<RunnerKeySummary>,
}

/// `DELETE /project/:id/files` response. Deletion may reroute to a
/// different attached runner owned by the same user if the project's
/// bound runner isn't connected; the UI must be told files may remain on
/// the original runner's disk in that case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteProjectFilesResponse {
    pub ok: bool,
    pub routed_to_runner_id: RunnerId,
    pub files_may_remain_on_original_runner: bool,
}

/// Shared machine-readable error body for every non-2xx HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn runner_command_request_flattens_command_body() {
        let req = RunnerCommandRequest {
            runner_id: RunnerId::new(),
            project_id: ProjectId::new(),
            command: CommandBody::StartBuild { prompt: "hi".into(), options: HashMap::new() },
        };
        let json = serde_json::to_string(&req).expect("serialize");
        assert!(json.contains("\"type\":\"start-build\""));
        assert!(json.contains("\"runnerId\""));
    }

    #[test]
    fn runner_status_response_round_trips() {
        let resp = RunnerStatusResponse {
            connections: vec![RunnerConnectionStatus {
                runner_id: RunnerId::new(),
                user_id: None,
                last_used_at_ms: None,
                revoked_at_ms: None,
                attached_at_ms: 1,
                last_heartbeat_at_ms: 2,
            }],
        };
        let json = serde_json::to_string(&resp).expect("serialize");
        let back: RunnerStatusResponse = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.connections.len(), 1);
    }
}
