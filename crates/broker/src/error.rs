// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Broker-wide error type. Every leaf error eventually classifies into
//! `rb_core::ErrorKind`; HTTP handlers convert that once, at the boundary.

use rb_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("project {project_id} is already bound to runner {bound_to}")]
    Conflict { project_id: String, bound_to: String },
    #[error("runner is not connected")]
    RunnerDisconnected,
    #[error("command accepted but runner did not ack in time")]
    Timeout,
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("transient I/O failure: {0}")]
    TransientIo(String),
    #[error("internal error: {0}")]
    Fatal(String),
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Unauthorized => ErrorKind::Unauthorized,
            BrokerError::Forbidden => ErrorKind::Forbidden,
            BrokerError::NotFound(_) => ErrorKind::NotFound,
            BrokerError::Conflict { .. } => ErrorKind::Conflict,
            BrokerError::RunnerDisconnected => ErrorKind::RunnerDisconnected,
            BrokerError::Timeout => ErrorKind::Timeout,
            BrokerError::Validation(_) => ErrorKind::Validation,
            BrokerError::TransientIo(_) => ErrorKind::TransientIo,
            BrokerError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

impl From<rb_storage::StorageError> for BrokerError {
    fn from(e: rb_storage::StorageError) -> Self {
        BrokerError::Fatal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_conflict_kind() {
        let err = BrokerError::Conflict { project_id: "p".into(), bound_to: "r".into() };
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
