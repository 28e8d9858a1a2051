// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Thin HTTP client over the broker's control plane (`rb_broker::http`).
//! Every method mirrors one route; error bodies are parsed back into the
//! same `ApiErrorBody` the broker emits so the CLI can surface the
//! machine-readable `code` alongside the message.

use rb_core::id::{CommandId, ProjectId, RunnerId, RunnerKeyId};
use rb_wire::{
    ApiErrorBody, CommandBody, DeleteProjectFilesResponse, IssueRunnerKeyResponse,
    ListRunnerKeysResponse, RunnerCommandAccepted, RunnerCommandRequest, RunnerStatusResponse,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{}: {}", .0.code, .0.error)]
    Api(ApiErrorBody),
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl ClientError {
    /// The machine-readable `code` field, when the failure came from the
    /// broker itself rather than the transport.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            ClientError::Api(body) => Some(&body.code),
            _ => None,
        }
    }
}

pub struct BrokerClient {
    base_url: String,
    http: reqwest::Client,
    user_id: Option<String>,
}

impl BrokerClient {
    pub fn new(base_url: impl Into<String>, user_id: Option<String>) -> Self {
        Self { base_url: base_url.into(), http: reqwest::Client::new(), user_id }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            match response.json::<ApiErrorBody>().await {
                Ok(body) => Err(ClientError::Api(body)),
                Err(_) => Err(ClientError::Unexpected("non-JSON error body".into())),
            }
        }
    }

    pub async fn issue_runner_key(&self, name: String) -> Result<IssueRunnerKeyResponse, ClientError> {
        let response = self.authed_request(reqwest::Method::POST, "/runner-keys").json(&Req { name }).send().await?;
        Self::decode(response).await
    }

    pub async fn list_runner_keys(&self) -> Result<ListRunnerKeysResponse, ClientError> {
        let response = self.authed_request(reqwest::Method::GET, "/runner-keys").send().await?;
        Self::decode(response).await
    }

    pub async fn revoke_runner_key(&self, id: RunnerKeyId) -> Result<(), ClientError> {
        let response = self.http.delete(self.url(&format!("/runner-keys/{id}"))).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            match response.json::<ApiErrorBody>().await {
                Ok(body) => Err(ClientError::Api(body)),
                Err(_) => Err(ClientError::Unexpected("non-JSON error body".into())),
            }
        }
    }

    pub async fn runner_status(&self) -> Result<RunnerStatusResponse, ClientError> {
        let response = self.http.get(self.url("/runner/status")).send().await?;
        Self::decode(response).await
    }

    pub async fn send_command(
        &self,
        runner_id: RunnerId,
        project_id: ProjectId,
        command: CommandBody,
    ) -> Result<CommandId, ClientError> {
        let response = self
            .http
            .post(self.url("/runner/command"))
            .json(&RunnerCommandRequest { runner_id, project_id, command })
            .send()
            .await?;
        let accepted: RunnerCommandAccepted = Self::decode(response).await?;
        Ok(accepted.command_id)
    }

    pub async fn delete_project_files(&self, project_id: ProjectId) -> Result<DeleteProjectFilesResponse, ClientError> {
        let response = self.authed_request(reqwest::Method::DELETE, &format!("/project/{project_id}/files")).send().await?;
        Self::decode(response).await
    }

    fn authed_request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.user_id {
            Some(id) => builder.header("x-user-id", id),
            None => builder,
        }
    }
}

#[derive(Serialize)]
struct Req {
    name: String,
}
