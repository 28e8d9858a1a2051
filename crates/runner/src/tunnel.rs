// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Tunnel manager: spawns a cloudflare-style quick-tunnel
//! binary for a local port, extracts its public URL, and retries with
//! jittered exponential backoff on transient failure.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use rand::Rng;
use regex::Regex;
use rb_core::id::ProjectId;
use rb_wire::{EventBody, RunnerEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::TunnelError;

/// How long to wait for a URL to appear before killing the process and
/// retrying.
const URL_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

#[allow(clippy::unwrap_used)] // fixed literal pattern, infallible by construction
fn trycloudflare_pattern() -> &'static Regex {
    use std::sync::OnceLock;
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"https://[A-Za-z0-9-]+\.trycloudflare\.com").unwrap())
}

struct ActiveTunnel {
    url: String,
    pid: u32,
}

pub struct TunnelManager {
    binary: String,
    max_retries: u32,
    tunnels: Mutex<HashMap<u16, ActiveTunnel>>,
}

impl TunnelManager {
    pub fn new(binary: impl Into<String>, max_retries: u32) -> Self {
        Self { binary: binary.into(), max_retries, tunnels: Mutex::new(HashMap::new()) }
    }

    pub fn url_for(&self, port: u16) -> Option<String> {
        self.tunnels.lock().get(&port).map(|t| t.url.clone())
    }

    /// Create a tunnel for `port`, returning its public URL. Returns the
    /// existing URL if one is already live.
    pub async fn create_tunnel(
        &self,
        project_id: ProjectId,
        port: u16,
        events: mpsc::Sender<RunnerEvent>,
    ) -> Result<String, TunnelError> {
        if let Some(url) = self.url_for(port) {
            return Ok(url);
        }

        let mut attempt = 0;
        loop {
            match self.spawn_and_wait_for_url(port).await {
                Ok((url, pid)) => {
                    self.tunnels.lock().insert(port, ActiveTunnel { url: url.clone(), pid });
                    let _ = events
                        .send(RunnerEvent::for_project(
                            project_id,
                            0,
                            EventBody::TunnelCreated { port, url: url.clone() },
                        ))
                        .await;
                    info!(port, %url, "tunnel created");
                    return Ok(url);
                }
                Err(TunnelError::Permanent(reason)) => {
                    warn!(port, %reason, "tunnel failed permanently, not retrying");
                    return Err(TunnelError::Permanent(reason));
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(e);
                    }
                    let backoff = exponential_backoff_with_jitter(attempt);
                    warn!(port, attempt, ?backoff, error = %e, "tunnel attempt failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Close the tunnel for `port`, if any. Idempotent.
    pub async fn close_tunnel(&self, project_id: ProjectId, port: u16, events: mpsc::Sender<RunnerEvent>) {
        let Some(tunnel) = self.tunnels.lock().remove(&port) else { return };
        let _ = kill(Pid::from_raw(tunnel.pid as i32), Signal::SIGTERM);
        let _ = events
            .send(RunnerEvent::for_project(project_id, 0, EventBody::TunnelClosed { port }))
            .await;
        info!(port, "tunnel closed");
    }

    async fn spawn_and_wait_for_url(&self, port: u16) -> Result<(String, u32), TunnelError> {
        let mut command = Command::new(&self.binary);
        command
            .arg("tunnel")
            .arg("--url")
            .arg(format!("http://localhost:{port}"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TunnelError::Permanent(format!("tunnel binary not found: {e}")));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(TunnelError::Permanent(format!("permission denied spawning tunnel binary: {e}")));
            }
            Err(e) => return Err(TunnelError::SpawnFailed(e.to_string())),
        };
        let pid = child.id().ok_or_else(|| TunnelError::SpawnFailed("child exited immediately".into()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TunnelError::SpawnFailed("child has no stdout pipe".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TunnelError::SpawnFailed("child has no stderr pipe".into()))?;
        let (url_tx, mut url_rx) = mpsc::channel::<String>(1);

        tokio::spawn(scan_for_url(stdout, url_tx.clone()));
        tokio::spawn(scan_for_url(stderr, url_tx));

        let wait_result = tokio::time::timeout(URL_WAIT_TIMEOUT, url_rx.recv()).await;
        match wait_result {
            Ok(Some(url)) => Ok((url, pid)),
            Ok(None) => {
                // Both scanner tasks closed their sender without a match;
                // the process likely exited without ever printing a URL.
                let status = child.wait().await;
                Err(TunnelError::ExitedEarly(format!("{status:?}")))
            }
            Err(_) => {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                let _ = child.wait().await;
                Err(TunnelError::Timeout)
            }
        }
    }
}

async fn scan_for_url(reader: impl tokio::io::AsyncRead + Unpin, url_tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(m) = trycloudflare_pattern().find(&line) {
            let _ = url_tx.send(m.as_str().to_string()).await;
            return;
        }
    }
}

/// `2^n * 1000ms + rand(0, 1000ms)`.
fn exponential_backoff_with_jitter(attempt: u32) -> Duration {
    let base_ms = 2u64.saturating_pow(attempt).saturating_mul(1000);
    let jitter_ms = rand::thread_rng().gen_range(0..1000);
    Duration::from_millis(base_ms + jitter_ms)
}
