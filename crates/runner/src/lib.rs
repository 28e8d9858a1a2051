// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Runner binary: attaches to a broker over the wire protocol and executes
//! the commands it receives. See the sibling modules in this crate for the
//! per-component breakdown (process supervisor, tunnel manager, build
//! executor, file operations).

pub mod build;
pub mod config;
pub mod error;
pub mod file;
pub mod provider;
pub mod supervisor;
pub mod tunnel;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rb_core::id::{CommandId, ProjectId};
use rb_wire::{AttachRequest, AttachResponse, Command, CommandBody, EventBody, ProtocolError, RunnerEvent};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use build::{run_build, BuildOutcome, BuildTransformer};
use config::RunnerConfig;
use provider::CliProviderStream;
use supervisor::ProcessSupervisor;
use tunnel::TunnelManager;

/// Everything a single attach session needs, assembled once and shared
/// across every command handled during that session's lifetime — the
/// runner-side analogue of `rb_broker::BrokerState`.
pub struct RunnerState {
    pub config: RunnerConfig,
    pub supervisor: Arc<ProcessSupervisor>,
    pub tunnels: Arc<TunnelManager>,
    pub tunnel_ports: parking_lot::Mutex<std::collections::HashMap<ProjectId, u16>>,
    pub provider_binary: String,
}

impl RunnerState {
    pub fn new(config: RunnerConfig, provider_binary: impl Into<String>) -> Arc<Self> {
        let tunnels = Arc::new(TunnelManager::new(config.tunnel_binary.clone(), config.tunnel_max_retries));
        Arc::new(Self {
            config,
            supervisor: Arc::new(ProcessSupervisor::new()),
            tunnels,
            tunnel_ports: parking_lot::Mutex::new(std::collections::HashMap::new()),
            provider_binary: provider_binary.into(),
        })
    }

    fn project_root(&self, project_id: ProjectId) -> PathBuf {
        file::project_root(&self.config.workspace_root, project_id)
    }
}

/// Run one attach attempt against `broker_addr`: connect, handshake, then
/// drive the reader/writer/heartbeat loops until the connection drops.
/// Returns once the session ends; the caller (`main`) decides whether to
/// reconnect.
pub async fn run_session(state: Arc<RunnerState>, broker_addr: &str) -> Result<(), ProtocolError> {
    let stream = TcpStream::connect(broker_addr).await?;
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    run_session_over(state, read_half, write_half).await
}

/// Same as [`run_session`] but over arbitrary duplex halves, so tests can
/// drive the protocol over an in-memory pipe instead of a real socket.
pub async fn run_session_over<R, W>(state: Arc<RunnerState>, mut read_half: R, mut write_half: W) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let runner_id = state.config.runner_id();
    let attach = AttachRequest::Attach {
        runner_id,
        secret: state.config.secret.clone(),
        version: state.config.version.clone(),
        platform: state.config.platform.clone(),
    };
    rb_wire::write_frame(&mut write_half, &attach, state.config.ipc_timeout()).await?;
    let response: AttachResponse = rb_wire::read_frame(&mut read_half, state.config.ipc_timeout()).await?;
    match response {
        AttachResponse::Attached => info!(%runner_id, "attached to broker"),
        AttachResponse::Error { error } => {
            warn!(%runner_id, %error, "broker rejected attach");
            return Err(ProtocolError::ConnectionClosed);
        }
    }

    let (event_tx, mut event_rx) = mpsc::channel::<RunnerEvent>(256);

    let heartbeat_state = state.clone();
    let heartbeat_tx = event_tx.clone();
    let heartbeat_interval = state.config.heartbeat_interval();
    let heartbeat_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        loop {
            interval.tick().await;
            let status = RunnerEvent {
                command_id: None,
                project_id: None,
                timestamp_ms: 0,
                body: EventBody::RunnerStatus {
                    version: heartbeat_state.config.version.clone(),
                    platform: heartbeat_state.config.platform.clone(),
                },
            };
            if heartbeat_tx.send(status).await.is_err() {
                break;
            }
        }
    });

    let writer_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Err(e) = rb_wire::write_frame(&mut write_half, &event, Duration::from_secs(30)).await {
                warn!(error = %e, "failed writing event frame, ending session");
                break;
            }
        }
    });

    let reader_result = reader_loop(state.clone(), &mut read_half, event_tx.clone()).await;

    heartbeat_task.abort();
    drop(event_tx);
    let _ = writer_task.await;

    reader_result
}

async fn reader_loop<R: AsyncRead + Unpin>(
    state: Arc<RunnerState>,
    read_half: &mut R,
    events: mpsc::Sender<RunnerEvent>,
) -> Result<(), ProtocolError> {
    loop {
        let command: Command =
            match rb_wire::read_frame(read_half, Duration::from_secs(3600)).await {
                Ok(command) => command,
                Err(ProtocolError::ConnectionClosed) => {
                    debug!("broker closed the connection");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
        debug!(command_id = %command.id, kind = command.body.type_name(), "command received");
        let ack = RunnerEvent::for_command(command.id, 0, EventBody::Ack);
        if events.send(ack).await.is_err() {
            return Ok(());
        }

        let state = state.clone();
        let events = events.clone();
        tokio::spawn(async move {
            handle_command(state, command, events).await;
        });
    }
}

async fn handle_command(state: Arc<RunnerState>, command: Command, events: mpsc::Sender<RunnerEvent>) {
    let project_id = command.project_id;
    let command_id = command.id;
    match command.body {
        CommandBody::StartBuild { prompt, .. } => handle_start_build(state, project_id, command_id, prompt, events).await,
        CommandBody::StartDevServer { run_command, cwd, env, .. } => {
            handle_start_dev_server(state, project_id, run_command, cwd, env, events).await
        }
        CommandBody::StopDevServer => {
            let port = state.tunnel_ports.lock().get(&project_id).copied();
            state.supervisor.stop_dev_server(project_id, port).await;
        }
        CommandBody::StartTunnel { port } => handle_start_tunnel(state, project_id, port, events).await,
        CommandBody::StopTunnel { port } => {
            state.tunnels.close_tunnel(project_id, port, events.clone()).await;
        }
        CommandBody::FetchLogs { since_cursor } => {
            for (cursor, stream, data) in state.supervisor.fetch_logs(&project_id, since_cursor) {
                let _ = events.send(RunnerEvent::for_project(project_id, 0, EventBody::LogChunk { stream, cursor, data })).await;
            }
        }
        CommandBody::RunnerHealthCheck => {
            let _ = events
                .send(RunnerEvent::for_project(
                    project_id,
                    0,
                    EventBody::RunnerStatus { version: state.config.version.clone(), platform: state.config.platform.clone() },
                ))
                .await;
        }
        CommandBody::DeleteProjectFiles => handle_delete_project_files(state, project_id, events).await,
        CommandBody::ReadFile { path } => handle_read_file(state, project_id, path, events).await,
        CommandBody::WriteFile { path, content } => handle_write_file(state, project_id, path, content, events).await,
        CommandBody::ListFiles { path } => handle_list_files(state, project_id, path, events).await,
    }
}

async fn handle_start_build(
    state: Arc<RunnerState>,
    project_id: ProjectId,
    command_id: CommandId,
    prompt: String,
    events: mpsc::Sender<RunnerEvent>,
) {
    let cwd = state.project_root(project_id);
    let workspace_parent = state.config.workspace_root.clone();
    let provider = match CliProviderStream::spawn(&state.provider_binary, &prompt, cwd.clone()).await {
        Ok(provider) => Box::new(provider),
        Err(e) => {
            let _ = events
                .send(RunnerEvent::for_command(command_id, 0, EventBody::BuildFailed { error: e.to_string(), stack: None }))
                .await;
            return;
        }
    };

    let mut transformer = BuildTransformer::new(cwd, workspace_parent);
    let events_for_stream = events.clone();
    let outcome = run_build(provider, &mut transformer, |canonical| {
        let event = RunnerEvent::for_command(command_id, 0, EventBody::BuildStream { frame: canonical });
        let _ = events_for_stream.try_send(event);
    })
    .await;

    match outcome {
        Ok(BuildOutcome::Completed { summary, todos }) => {
            let _ = events.send(RunnerEvent::for_command(command_id, 0, EventBody::BuildCompleted { summary, todos })).await;
        }
        Ok(BuildOutcome::Failed { error, stack }) => {
            let _ = events.send(RunnerEvent::for_command(command_id, 0, EventBody::BuildFailed { error, stack })).await;
        }
        Err(e) => {
            let _ = events
                .send(RunnerEvent::for_command(command_id, 0, EventBody::BuildFailed { error: e.to_string(), stack: None }))
                .await;
        }
    }
}

async fn handle_start_dev_server(
    state: Arc<RunnerState>,
    project_id: ProjectId,
    run_command: String,
    cwd: PathBuf,
    env: Vec<(String, String)>,
    events: mpsc::Sender<RunnerEvent>,
) {
    // The supervisor's own events are routed through a local relay first so
    // every `port-detected` it emits over the process's lifetime — not just
    // the one at spawn time — gets a chance to drive tunnel recreation
    // before reaching the broker.
    let (relay_tx, relay_rx) = mpsc::channel(256);
    tokio::spawn(relay_dev_server_events(state.clone(), project_id, relay_rx, events.clone()));

    if let Err(e) = state.supervisor.start_dev_server(project_id, run_command, cwd, env, relay_tx).await {
        let _ = events.send(RunnerEvent::for_project(project_id, 0, EventBody::Error { message: e.to_string() })).await;
    }
}

/// Forwards every event the supervisor emits for `project_id` on to the
/// broker unchanged, applying the runner-driven tunnel-recreation side
/// effect on `port-detected` along the way.
async fn relay_dev_server_events(
    state: Arc<RunnerState>,
    project_id: ProjectId,
    mut relay_rx: mpsc::Receiver<RunnerEvent>,
    events: mpsc::Sender<RunnerEvent>,
) {
    while let Some(event) = relay_rx.recv().await {
        if let EventBody::PortDetected { port } = &event.body {
            recreate_tunnel_on_port_change(&state, project_id, *port, events.clone()).await;
        }
        if events.send(event).await.is_err() {
            break;
        }
    }
}

/// Runner-driven tunnel recreation (spec §9 open question 3): whenever a
/// new `port-detected` supersedes a prior one for the same project, close
/// any tunnel on the old port before opening one on the new port. A project
/// with no tracked tunnel port is left alone — there is nothing to
/// supersede until an explicit `start-tunnel` command creates one.
async fn recreate_tunnel_on_port_change(
    state: &Arc<RunnerState>,
    project_id: ProjectId,
    port: u16,
    events: mpsc::Sender<RunnerEvent>,
) {
    let previous_port = {
        let mut tunnel_ports = state.tunnel_ports.lock();
        match tunnel_ports.get(&project_id).copied() {
            Some(previous) if previous != port => {
                tunnel_ports.insert(project_id, port);
                Some(previous)
            }
            _ => None,
        }
    };
    let Some(previous_port) = previous_port else { return };

    state.tunnels.close_tunnel(project_id, previous_port, events.clone()).await;
    if let Err(e) = state.tunnels.create_tunnel(project_id, port, events.clone()).await {
        let _ = events.send(RunnerEvent::for_project(project_id, 0, EventBody::Error { message: e.to_string() })).await;
    }
}

/// Handles an explicit `start-tunnel` command, tracking the project's
/// current tunnel port so a later `port-detected` can tell whether it
/// supersedes this one (see [`recreate_tunnel_on_port_change`]).
async fn handle_start_tunnel(state: Arc<RunnerState>, project_id: ProjectId, port: u16, events: mpsc::Sender<RunnerEvent>) {
    let previous = state.tunnel_ports.lock().insert(project_id, port);
    if let Some(previous_port) = previous {
        if previous_port != port {
            state.tunnels.close_tunnel(project_id, previous_port, events.clone()).await;
        }
    }
    if let Err(e) = state.tunnels.create_tunnel(project_id, port, events.clone()).await {
        let _ = events.send(RunnerEvent::for_project(project_id, 0, EventBody::Error { message: e.to_string() })).await;
    }
}

async fn handle_delete_project_files(state: Arc<RunnerState>, project_id: ProjectId, events: mpsc::Sender<RunnerEvent>) {
    let root = state.project_root(project_id);
    match tokio::fs::remove_dir_all(&root).await {
        Ok(()) => {
            let _ = events.send(RunnerEvent::for_project(project_id, 0, EventBody::FilesDeleted { rerouted_to_runner: false })).await;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let _ = events.send(RunnerEvent::for_project(project_id, 0, EventBody::FilesDeleted { rerouted_to_runner: false })).await;
        }
        Err(e) => {
            let _ = events.send(RunnerEvent::for_project(project_id, 0, EventBody::Error { message: e.to_string() })).await;
        }
    }
}

async fn handle_read_file(state: Arc<RunnerState>, project_id: ProjectId, path: PathBuf, events: mpsc::Sender<RunnerEvent>) {
    let root = state.project_root(project_id);
    match file::read_file(&root, &path).await {
        Ok(content) => {
            let _ = events.send(RunnerEvent::for_project(project_id, 0, EventBody::FileContent { path, content })).await;
        }
        Err(e) => {
            let _ = events.send(RunnerEvent::for_project(project_id, 0, EventBody::Error { message: e.to_string() })).await;
        }
    }
}

async fn handle_write_file(
    state: Arc<RunnerState>,
    project_id: ProjectId,
    path: PathBuf,
    content: String,
    events: mpsc::Sender<RunnerEvent>,
) {
    let root = state.project_root(project_id);
    match file::write_file(&root, &path, &content).await {
        Ok(()) => {
            let _ = events.send(RunnerEvent::for_project(project_id, 0, EventBody::FileWritten { path })).await;
        }
        Err(e) => {
            let _ = events.send(RunnerEvent::for_project(project_id, 0, EventBody::Error { message: e.to_string() })).await;
        }
    }
}

async fn handle_list_files(state: Arc<RunnerState>, project_id: ProjectId, path: PathBuf, events: mpsc::Sender<RunnerEvent>) {
    let root = state.project_root(project_id);
    match file::list_files(&root, &path).await {
        Ok(entries) => {
            let _ = events.send(RunnerEvent::for_project(project_id, 0, EventBody::FileList { entries })).await;
        }
        Err(e) => {
            let _ = events.send(RunnerEvent::for_project(project_id, 0, EventBody::Error { message: e.to_string() })).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rb_wire::CommandBody;

    fn state() -> Arc<RunnerState> {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RunnerConfig {
            workspace_root: dir.into_path(),
            secret: "right-secret".into(),
            ..RunnerConfig::default()
        };
        RunnerState::new(config, "true")
    }

    #[tokio::test]
    async fn handshake_over_a_duplex_pipe_succeeds_against_a_broker_stub() {
        let (runner_side, mut broker_side) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(runner_side);
        let state = state();

        let broker_task = tokio::spawn(async move {
            let _req: AttachRequest = rb_wire::read_frame(&mut broker_side, Duration::from_secs(2)).await.expect("read attach");
            rb_wire::write_frame(&mut broker_side, &AttachResponse::Attached, Duration::from_secs(2)).await.expect("write attached");
            // Send a health-check command, then close.
            let cmd = Command::new(ProjectId::new(), 0, CommandBody::RunnerHealthCheck);
            rb_wire::write_frame(&mut broker_side, &cmd, Duration::from_secs(2)).await.expect("write command");
            // Drain at least the ack + status before dropping.
            let _ack: RunnerEvent = rb_wire::read_frame(&mut broker_side, Duration::from_secs(2)).await.expect("read ack");
            let _status: RunnerEvent = rb_wire::read_frame(&mut broker_side, Duration::from_secs(2)).await.expect("read status");
        });

        let session = tokio::time::timeout(Duration::from_secs(2), run_session_over(state, read_half, write_half)).await;
        assert!(session.is_ok());
        broker_task.await.expect("broker task");
    }

    #[tokio::test]
    async fn port_detected_with_no_tracked_tunnel_does_nothing() {
        let state = state();
        let project_id = ProjectId::new();
        let (events_tx, mut events_rx) = mpsc::channel(8);

        recreate_tunnel_on_port_change(&state, project_id, 3001, events_tx).await;

        assert!(state.tunnel_ports.lock().get(&project_id).is_none());
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn port_detected_superseding_a_tracked_tunnel_port_recreates_it() {
        let state = state();
        let project_id = ProjectId::new();
        state.tunnel_ports.lock().insert(project_id, 3001);
        let (events_tx, mut events_rx) = mpsc::channel(8);

        recreate_tunnel_on_port_change(&state, project_id, 3002, events_tx).await;

        // The tracked port moved to the new one...
        assert_eq!(state.tunnel_ports.lock().get(&project_id).copied(), Some(3002));
        // ...and since no real tunnel was ever established on 3001 (no
        // `cloudflared` binary in this environment), recreation surfaces as
        // the create-side failure rather than silently doing nothing.
        let event = events_rx.recv().await.expect("an event was emitted");
        assert!(matches!(event.body, EventBody::Error { .. }));
    }

    #[tokio::test]
    async fn port_detected_matching_the_tracked_port_is_a_no_op() {
        let state = state();
        let project_id = ProjectId::new();
        state.tunnel_ports.lock().insert(project_id, 3001);
        let (events_tx, mut events_rx) = mpsc::channel(8);

        recreate_tunnel_on_port_change(&state, project_id, 3001, events_tx).await;

        assert_eq!(state.tunnel_ports.lock().get(&project_id).copied(), Some(3001));
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unauthorized_attach_response_ends_the_session_immediately() {
        let (runner_side, mut broker_side) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(runner_side);
        let state = state();

        let broker_task = tokio::spawn(async move {
            let _req: AttachRequest = rb_wire::read_frame(&mut broker_side, Duration::from_secs(2)).await.expect("read attach");
            rb_wire::write_frame(&mut broker_side, &AttachResponse::unauthorized(), Duration::from_secs(2))
                .await
                .expect("write unauthorized");
        });

        let result = run_session_over(state, read_half, write_half).await;
        assert!(result.is_err());
        broker_task.await.expect("broker task");
    }
}
