// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Runner broker entry point: load config, assemble shared state, and run
//! the runner-attach TCP listener alongside the HTTP control plane until
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use rb_broker::config::BrokerConfig;
use rb_broker::{session, BrokerState};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = BrokerConfig::load();
    let http_addr: std::net::SocketAddr = config.http_addr.parse()?;
    let runner_addr: std::net::SocketAddr = config.runner_addr.parse()?;
    let state = BrokerState::new_in_memory(config);

    info!(%http_addr, %runner_addr, "starting runner broker");

    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let now_ms = sweep_state.clock.epoch_ms();
            let heartbeat_timeout_ms = sweep_state.config.heartbeat_timeout().as_millis() as u64;
            for stale in sweep_state.registry.sweep_stale(now_ms, heartbeat_timeout_ms) {
                for command_id in stale.drain_in_flight() {
                    sweep_state.router.disconnect_command(stale.runner_id, command_id);
                }
            }
        }
    });

    let runner_listener_state = state.clone();
    let runner_listener = tokio::spawn(async move {
        if let Err(e) = session::run_runner_listener(runner_addr, runner_listener_state).await {
            tracing::error!(error = %e, "runner listener exited with an error");
        }
    });

    let http_router = rb_broker::http::router(state.clone());
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let shutdown = state.shutdown.clone();
    let http_server = tokio::spawn(async move {
        axum::serve(http_listener, http_router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    shutdown_signal().await;
    info!("shutdown signal received, draining runner sessions");
    state.begin_shutdown();

    let _ = runner_listener.await;
    let _ = http_server.await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => std::future::pending().await,
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
