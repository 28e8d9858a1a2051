// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Runner configuration: environment overrides first, falling back to an
//! optional `runner.toml`, falling back to defaults — the same load order
//! as `rb_broker::config::BrokerConfig`.

use std::path::PathBuf;
use std::time::Duration;

use rb_core::setters;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Self-chosen identifier presented at attach time. Generated once and
    /// persisted next to the workspace root if not supplied.
    pub runner_id: Option<String>,
    pub broker_addr: String,
    pub secret: String,
    pub workspace_root: PathBuf,
    pub heartbeat_interval_ms: u64,
    pub ipc_timeout_ms: u64,
    /// Initial reconnect backoff; doubles on each failed attach attempt up
    /// to `reconnect_backoff_max_ms`.
    pub reconnect_backoff_base_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    pub tunnel_binary: String,
    pub tunnel_max_retries: u32,
    pub version: String,
    pub platform: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            runner_id: None,
            broker_addr: "127.0.0.1:7777".into(),
            secret: String::new(),
            workspace_root: PathBuf::from("."),
            heartbeat_interval_ms: 15_000,
            ipc_timeout_ms: 5_000,
            reconnect_backoff_base_ms: 500,
            reconnect_backoff_max_ms: 30_000,
            tunnel_binary: "cloudflared".into(),
            tunnel_max_retries: 5,
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
        }
    }
}

impl RunnerConfig {
    setters!(
        into {
            broker_addr: String,
            secret: String,
            tunnel_binary: String,
        }
        set {
            heartbeat_interval_ms: u64,
            ipc_timeout_ms: u64,
            reconnect_backoff_base_ms: u64,
            reconnect_backoff_max_ms: u64,
            tunnel_max_retries: u32,
            workspace_root: PathBuf,
        }
    );

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn ipc_timeout(&self) -> Duration {
        Duration::from_millis(self.ipc_timeout_ms)
    }

    pub fn reconnect_backoff_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_base_ms)
    }

    pub fn reconnect_backoff_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_max_ms)
    }

    /// Load from `RB_RUNNER_CONFIG` (a TOML file path) if set, else
    /// defaults, then apply `RB_RUNNER_*` environment overrides on top.
    pub fn load() -> Self {
        let mut config: Self = std::env::var("RB_RUNNER_CONFIG")
            .ok()
            .map(PathBuf::from)
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|raw| toml::from_str(&raw).ok())
            .unwrap_or_default();
        apply_env_overrides(&mut config);
        config
    }

    /// The runner id this process will attach with: the configured value,
    /// or a fresh random one persisted for next time would be the caller's
    /// job (out of scope here — `rb-cli` owns key/identity bootstrapping).
    pub fn runner_id(&self) -> rb_core::id::RunnerId {
        match &self.runner_id {
            Some(id) => rb_core::id::RunnerId::from_string(id),
            None => rb_core::id::RunnerId::new(),
        }
    }
}

fn apply_env_overrides(config: &mut RunnerConfig) {
    if let Ok(v) = std::env::var("RB_RUNNER_ID") {
        config.runner_id = Some(v);
    }
    if let Ok(v) = std::env::var("RB_RUNNER_BROKER_ADDR") {
        config.broker_addr = v;
    }
    if let Ok(v) = std::env::var("RB_RUNNER_SECRET") {
        config.secret = v;
    }
    if let Ok(v) = std::env::var("RB_RUNNER_WORKSPACE_ROOT") {
        config.workspace_root = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("RB_RUNNER_TUNNEL_BINARY") {
        config.tunnel_binary = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let config = RunnerConfig::default();
        assert!(config.reconnect_backoff_base_ms < config.reconnect_backoff_max_ms);
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(15_000));
    }

    #[test]
    fn runner_id_falls_back_to_a_fresh_random_id() {
        let config = RunnerConfig::default();
        let a = config.runner_id();
        let b = config.runner_id();
        assert_ne!(a, b);
    }

    #[test]
    fn configured_runner_id_is_stable() {
        let config = RunnerConfig { runner_id: Some("rnr-fixed-id-0000000".into()), ..RunnerConfig::default() };
        assert_eq!(config.runner_id(), config.runner_id());
    }
}
