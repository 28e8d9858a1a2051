// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared error taxonomy.
//!
//! This is the *kind*, not the final leaf error type — each crate defines
//! its own `thiserror` enums for their own failure modes and maps them into
//! this taxonomy at the point where an HTTP response (or wire `error`
//! event) has to be produced. Only the broker's HTTP layer turns a leaf
//! error into a status code.

use serde::{Deserialize, Serialize};

/// The stable, machine-readable error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    RunnerDisconnected,
    Timeout,
    Validation,
    TransientIo,
    Fatal,
}

impl ErrorKind {
    /// The HTTP status code this kind maps to at the boundary.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::RunnerDisconnected => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::Validation => 400,
            ErrorKind::TransientIo => 503,
            ErrorKind::Fatal => 500,
        }
    }

    /// The stable `code` string surfaced in HTTP error bodies.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RunnerDisconnected => "runner_disconnected",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::Fatal => "fatal",
        }
    }
}

/// A classified error carrying a user-safe message and its taxonomy kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for ClassifiedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping_covers_every_kind() {
        assert_eq!(ErrorKind::Unauthorized.http_status(), 401);
        assert_eq!(ErrorKind::Forbidden.http_status(), 403);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::Conflict.http_status(), 409);
        assert_eq!(ErrorKind::RunnerDisconnected.http_status(), 503);
        assert_eq!(ErrorKind::Timeout.http_status(), 504);
        assert_eq!(ErrorKind::Validation.http_status(), 400);
        assert_eq!(ErrorKind::Fatal.http_status(), 500);
    }
}
