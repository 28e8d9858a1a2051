// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Runner broker: the control-plane process runners attach to and UIs
//! talk to over HTTP. See `crates/broker/src/*` for the per-component
//! breakdown (connection registry, command dispatcher, event router,
//! port allocator, project↔runner binding, runner-key store).

pub mod binding;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod keys;
pub mod ports;
pub mod registry;
pub mod router;
pub mod session;

use std::sync::Arc;

use rb_core::Clock;
use rb_storage::{PortAllocationRepository, ProjectRepository, RunnerKeyRepository, RunningProcessRepository};
use tokio_util::sync::CancellationToken;

use binding::ProjectBinding;
use config::BrokerConfig;
use dispatch::{CommandDispatcher, PendingAcks};
use keys::KeyStore;
use ports::PortAllocator;
use registry::ConnectionRegistry;
use router::EventRouter;

/// Everything a runner session or an HTTP handler needs, assembled once at
/// startup and shared behind `Arc`.
pub struct BrokerState {
    pub config: BrokerConfig,
    pub clock: Arc<dyn Clock>,
    pub registry: Arc<ConnectionRegistry>,
    pub acks: Arc<PendingAcks>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub router: Arc<EventRouter>,
    pub ports: Arc<PortAllocator>,
    pub keys: Arc<KeyStore>,
    pub binding: Arc<ProjectBinding>,
    pub projects: Arc<dyn ProjectRepository>,
    pub processes: Arc<dyn RunningProcessRepository>,
    pub runner_keys: Arc<dyn RunnerKeyRepository>,
    /// Cancelled once on broker shutdown; the runner listener stops
    /// accepting and every live session is given a chance to drain its
    /// outbound queue before the socket closes.
    pub shutdown: CancellationToken,
}

impl BrokerState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BrokerConfig,
        clock: Arc<dyn Clock>,
        projects: Arc<dyn ProjectRepository>,
        processes: Arc<dyn RunningProcessRepository>,
        ports_repo: Arc<dyn PortAllocationRepository>,
        runner_keys: Arc<dyn RunnerKeyRepository>,
    ) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::default());
        let acks = Arc::new(PendingAcks::default());
        let dispatcher = Arc::new(CommandDispatcher::new(registry.clone(), acks.clone(), config.ack_timeout()));
        let ports = Arc::new(PortAllocator::new(
            ports_repo,
            processes.clone(),
            clock.clone(),
            config.port_range_low,
            config.port_range_high,
            config.port_reservation_ttl(),
        ));
        let router = Arc::new(EventRouter::new(
            registry.clone(),
            acks.clone(),
            projects.clone(),
            processes.clone(),
            ports.clone(),
            config.event_buffer_capacity,
        ));
        let keys = Arc::new(KeyStore::new(runner_keys.clone(), clock.clone(), config.local_mode_secret.clone()));
        let binding = Arc::new(ProjectBinding::new(projects.clone()));

        Arc::new(Self {
            config,
            clock,
            registry,
            acks,
            dispatcher,
            router,
            ports,
            keys,
            binding,
            projects,
            processes,
            runner_keys,
            shutdown: CancellationToken::new(),
        })
    }

    /// Assemble a broker backed entirely by the in-process memory store —
    /// the default local backend.
    pub fn new_in_memory(config: BrokerConfig) -> Arc<Self> {
        Self::new(
            config,
            Arc::new(rb_core::SystemClock),
            Arc::new(rb_storage::MemoryProjectRepository::default()),
            Arc::new(rb_storage::MemoryRunningProcessRepository::default()),
            Arc::new(rb_storage::MemoryPortAllocationRepository::default()),
            Arc::new(rb_storage::MemoryRunnerKeyRepository::default()),
        )
    }

    /// Broadcast a graceful close to every attached runner and stop
    /// accepting new ones. Each session's writer task drains whatever is
    /// already queued before the socket closes.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
        for conn in self.registry.list() {
            conn.close();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn memory_state_with_local_mode(secret: &str) -> Arc<BrokerState> {
        let config = BrokerConfig { local_mode_secret: Some(secret.to_string()), ..BrokerConfig::default() };
        BrokerState::new_in_memory(config)
    }
}
