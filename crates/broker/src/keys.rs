// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Runner-key store: issues and validates the long-lived bearer secrets a
//! runner presents on attach.

use std::sync::Arc;

use rb_core::id::{RunnerKeyId, UserId};
use rb_core::{Clock, RunnerKey};
use rb_storage::RunnerKeyRepository;
use sha2::{Digest, Sha256};

use crate::error::BrokerError;

const KEY_PREFIX_LABEL: &str = "sv_";
/// How much of the generated secret is kept as a non-secret lookup prefix.
const PREFIX_VISIBLE_CHARS: usize = 12;

pub struct KeyStore {
    repo: Arc<dyn RunnerKeyRepository>,
    clock: Arc<dyn Clock>,
    /// Short-circuits authentication to a fixed shared secret; process-global.
    local_mode_secret: Option<String>,
}

pub struct IssuedKey {
    pub id: RunnerKeyId,
    pub plaintext: String,
    pub key_prefix: String,
}

impl KeyStore {
    pub fn new(
        repo: Arc<dyn RunnerKeyRepository>,
        clock: Arc<dyn Clock>,
        local_mode_secret: Option<String>,
    ) -> Self {
        Self { repo, clock, local_mode_secret }
    }

    pub async fn issue(&self, user_id: UserId, name: String) -> Result<IssuedKey, BrokerError> {
        let token = generate_token();
        let plaintext = format!("{KEY_PREFIX_LABEL}{token}");
        let key_prefix: String = plaintext.chars().take(PREFIX_VISIBLE_CHARS).collect();
        let key_hash = hash_secret(&plaintext);

        let id = RunnerKeyId::new();
        let key = RunnerKey {
            id,
            user_id,
            name,
            key_hash,
            key_prefix: key_prefix.clone(),
            created_at_ms: self.clock.epoch_ms(),
            last_used_at_ms: None,
            revoked_at_ms: None,
        };
        self.repo.insert(key).await?;
        Ok(IssuedKey { id, plaintext, key_prefix })
    }

    /// Authenticate a presented plaintext secret, returning the owning user.
    ///
    /// In local mode, any plaintext equal to the configured shared secret
    /// authenticates as a synthetic local user; the persisted key store is
    /// not consulted.
    pub async fn authenticate(&self, plaintext: &str) -> Result<(RunnerKeyId, UserId), BrokerError> {
        if let Some(secret) = &self.local_mode_secret {
            if plaintext == secret {
                return Ok((RunnerKeyId::new(), UserId::new()));
            }
        }

        let key_prefix: String = plaintext.chars().take(PREFIX_VISIBLE_CHARS).collect();
        let candidates = self.repo.find_by_prefix(&key_prefix).await?;
        let presented_hash = hash_secret(plaintext);

        let matched = candidates
            .into_iter()
            .find(|k| k.is_active() && k.key_hash == presented_hash)
            .ok_or(BrokerError::Unauthorized)?;

        self.repo.touch_last_used(&matched.id, self.clock.epoch_ms()).await?;
        Ok((matched.id, matched.user_id))
    }

    pub async fn list(&self, user_id: &UserId) -> Result<Vec<RunnerKey>, BrokerError> {
        Ok(self.repo.list_for_user(user_id).await?)
    }

    /// Idempotent: revoking an already-revoked (or absent) key succeeds.
    pub async fn revoke(&self, id: &RunnerKeyId) -> Result<(), BrokerError> {
        self.repo.revoke(id, self.clock.epoch_ms()).await?;
        Ok(())
    }
}

fn generate_token() -> String {
    nanoid::nanoid!(32)
}

fn hash_secret(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
