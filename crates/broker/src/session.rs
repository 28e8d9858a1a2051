// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Runner session state machine:
//! `Handshaking → Authenticated → Active → Draining → Closed`.
//!
//! One task per attached runner runs this whole machine: it reads the
//! `attach` frame, authenticates, installs itself into the connection
//! registry (displacing any prior attach for the same `runnerId`), then
//! runs a reader loop (routes incoming events through [`EventRouter`]) and
//! a writer loop (drains this runner's outbound command queue) until
//! either side closes, the heartbeat times out, or the session is
//! displaced.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rb_wire::{AttachRequest, AttachResponse, Command, ProtocolError, RunnerEvent};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::BrokerState;
use crate::registry::RunnerConnection;

/// Bound the writer's per-frame write timeout independently of the
/// configurable ack timeout — a stalled socket write should not wait
/// indefinitely even if the broker is otherwise configured generously.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Accept runner attachments on `addr` until `state.shutdown` fires.
pub async fn run_runner_listener(addr: SocketAddr, state: Arc<BrokerState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_runner_listener(listener, state).await;
    Ok(())
}

/// Same as [`run_runner_listener`] but over an already-bound listener —
/// lets callers (tests, mainly) discover the actual port before serving,
/// by binding to `127.0.0.1:0` themselves first.
pub async fn serve_runner_listener(listener: TcpListener, state: Arc<BrokerState>) {
    let addr = listener.local_addr().ok();
    info!(?addr, "runner listener started");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                warn!(%peer, error = %e, "runner connection ended with a protocol error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "runner accept failed"),
                }
            }
            () = state.shutdown.cancelled() => {
                info!("runner listener shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<BrokerState>) -> Result<(), ProtocolError> {
    let _ = stream.set_nodelay(true);
    let (mut read_half, mut write_half) = stream.into_split();

    // Handshaking: the first frame must be an Attach.
    let AttachRequest::Attach { runner_id, secret, version, platform } =
        rb_wire::read_frame::<_, AttachRequest>(&mut read_half, state.config.ipc_timeout()).await?;

    let (key_id, user_id) = match state.keys.authenticate(&secret).await {
        Ok((key_id, user_id)) => (key_id, user_id),
        Err(_) => {
            warn!(%runner_id, "attach rejected: unauthorized");
            rb_wire::write_frame(&mut write_half, &AttachResponse::unauthorized(), state.config.ipc_timeout())
                .await?;
            return Ok(());
        }
    };

    // Authenticated -> Active: install into the registry, displacing any
    // prior attach for this runnerId.
    let (command_tx, mut command_rx) = mpsc::channel::<Command>(state.config.event_buffer_capacity);
    let now_ms = state.clock.epoch_ms();
    let conn =
        Arc::new(RunnerConnection::with_key(runner_id, Some(user_id), Some(key_id), now_ms, command_tx));

    if let Some(displaced) = state.registry.attach(conn.clone()) {
        info!(%runner_id, "displaced a prior connection for this runner id");
        fail_in_flight(&state, runner_id, displaced.drain_in_flight());
    }

    rb_wire::write_frame(&mut write_half, &AttachResponse::Attached, state.config.ipc_timeout()).await?;
    info!(%runner_id, %version, %platform, "runner attached");

    let writer_cancel = conn.cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_cancel.cancelled() => {
                    // Drain whatever is already queued so a graceful
                    // shutdown gives the runner a chance to see it before
                    // the socket closes.
                    while let Ok(command) = command_rx.try_recv() {
                        if rb_wire::write_frame(&mut write_half, &command, WRITE_TIMEOUT).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
                maybe_command = command_rx.recv() => {
                    let Some(command) = maybe_command else { break };
                    if let Err(e) = rb_wire::write_frame(&mut write_half, &command, WRITE_TIMEOUT).await {
                        warn!(%runner_id, error = %e, "write failed, closing session");
                        break;
                    }
                }
            }
        }
    });

    // Active: read events until closed, displaced, or the heartbeat lapses.
    let read_timeout = state.config.heartbeat_timeout();
    loop {
        tokio::select! {
            biased;
            () = conn.cancel.cancelled() => {
                debug!(%runner_id, "session cancelled (displaced or shutting down)");
                break;
            }
            frame = rb_wire::read_frame::<_, RunnerEvent>(&mut read_half, read_timeout) => {
                match frame {
                    Ok(event) => state.router.route(runner_id, event).await,
                    Err(ProtocolError::Timeout) => {
                        warn!(%runner_id, "no frame within heartbeat timeout, closing session");
                        break;
                    }
                    Err(ProtocolError::ConnectionClosed) => {
                        debug!(%runner_id, "runner closed its end of the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(%runner_id, error = %e, "protocol error reading from runner, closing session");
                        break;
                    }
                }
            }
        }
    }

    // Draining -> Closed.
    conn.close();
    let _ = writer.await;
    state.registry.detach(&runner_id, &conn);
    fail_in_flight(&state, runner_id, conn.drain_in_flight());
    info!(%runner_id, "runner session closed");
    Ok(())
}

fn fail_in_flight(state: &Arc<BrokerState>, runner_id: rb_core::id::RunnerId, command_ids: Vec<rb_core::id::CommandId>) {
    for command_id in command_ids {
        state.router.disconnect_command(runner_id, command_id);
    }
}
