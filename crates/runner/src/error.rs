// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Runner-side leaf error enums, one per subsystem, matching
//! `rb_broker::error`'s per-crate-boundary shape.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("a process is already tracked for this project")]
    AlreadyRunning,
    #[error("failed to spawn dev server: {0}")]
    SpawnFailed(String),
    #[error("no process tracked for this project")]
    NotTracked,
}

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to spawn tunnel binary: {0}")]
    SpawnFailed(String),
    #[error("no tunnel URL observed within the startup window")]
    Timeout,
    #[error("tunnel binary exited before producing a URL (status {0})")]
    ExitedEarly(String),
    #[error("permanent tunnel failure: {0}")]
    Permanent(String),
}

#[derive(Debug, Error)]
pub enum BuildExecutorError {
    #[error("provider stream failed: {0}")]
    ProviderFailed(String),
}

#[derive(Debug, Error)]
pub enum FileOpError {
    #[error("path escapes the project workspace: {0}")]
    PathEscape(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    #[error(transparent)]
    Build(#[from] BuildExecutorError),
    #[error(transparent)]
    File(#[from] FileOpError),
    #[error("protocol error: {0}")]
    Protocol(#[from] rb_wire::ProtocolError),
}
