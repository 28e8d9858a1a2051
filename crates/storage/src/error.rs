// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Repository-layer errors. These are deliberately narrow — row-not-found
//! and row-conflict are expressed through return values (`Option`,
//! `BindOutcome`), not errors, so callers aren't forced to match on an
//! error variant for an expected outcome.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
