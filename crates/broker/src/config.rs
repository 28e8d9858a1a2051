// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized configuration for the broker: environment overrides first,
//! falling back to an optional `broker.toml`, falling back to defaults.

use std::path::PathBuf;
use std::time::Duration;

use rb_core::setters;
use serde::{Deserialize, Serialize};

/// Runtime-tunable knobs. Field names mirror the `RB_*` environment
/// variables that override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub http_addr: String,
    pub runner_addr: String,
    pub heartbeat_interval_ms: u64,
    pub ack_timeout_ms: u64,
    pub ipc_timeout_ms: u64,
    pub port_range_low: u16,
    pub port_range_high: u16,
    pub port_reservation_ttl_ms: u64,
    pub event_buffer_capacity: usize,
    /// Short-circuits runner-key authentication to a fixed shared secret.
    /// Process-global, intended for local/single-operator deployments only.
    pub local_mode_secret: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".into(),
            runner_addr: "0.0.0.0:7777".into(),
            heartbeat_interval_ms: 15_000,
            ack_timeout_ms: 10_000,
            ipc_timeout_ms: 5_000,
            port_range_low: 3001,
            port_range_high: 4000,
            port_reservation_ttl_ms: 10 * 60 * 1000,
            event_buffer_capacity: 256,
            local_mode_secret: None,
        }
    }
}

impl BrokerConfig {
    setters!(
        into {
            http_addr: String,
            runner_addr: String,
        }
        set {
            heartbeat_interval_ms: u64,
            ack_timeout_ms: u64,
            ipc_timeout_ms: u64,
            port_range_low: u16,
            port_range_high: u16,
            port_reservation_ttl_ms: u64,
            event_buffer_capacity: usize,
        }
        option {
            local_mode_secret: String,
        }
    );

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval() * 2
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn ipc_timeout(&self) -> Duration {
        Duration::from_millis(self.ipc_timeout_ms)
    }

    pub fn port_reservation_ttl(&self) -> Duration {
        Duration::from_millis(self.port_reservation_ttl_ms)
    }

    /// Load from `RB_CONFIG` (a TOML file path) if set, else defaults, then
    /// apply `RB_*` environment overrides on top.
    pub fn load() -> Self {
        let mut config = std::env::var("RB_CONFIG")
            .ok()
            .map(PathBuf::from)
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|raw| toml::from_str(&raw).ok())
            .unwrap_or_default();
        apply_env_overrides(&mut config);
        config
    }
}

fn apply_env_overrides(config: &mut BrokerConfig) {
    if let Ok(v) = std::env::var("RB_HTTP_ADDR") {
        config.http_addr = v;
    }
    if let Ok(v) = std::env::var("RB_RUNNER_ADDR") {
        config.runner_addr = v;
    }
    if let Ok(v) = std::env::var("RB_LOCAL_MODE_SECRET") {
        config.local_mode_secret = Some(v);
    }
    if let Ok(v) = env_u64("RB_HEARTBEAT_INTERVAL_MS") {
        config.heartbeat_interval_ms = v;
    }
    if let Ok(v) = env_u64("RB_ACK_TIMEOUT_MS") {
        config.ack_timeout_ms = v;
    }
}

fn env_u64(name: &str) -> Result<u64, ()> {
    std::env::var(name).ok().and_then(|s| s.parse().ok()).ok_or(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let config = BrokerConfig::default();
        assert!(config.port_range_low < config.port_range_high);
        assert_eq!(config.heartbeat_timeout(), config.heartbeat_interval() * 2);
    }

    #[test]
    fn builder_setters_apply() {
        let config = BrokerConfig::default().http_addr("127.0.0.1:9000").ack_timeout_ms(2_000);
        assert_eq!(config.http_addr, "127.0.0.1:9000");
        assert_eq!(config.ack_timeout_ms, 2_000);
    }
}
