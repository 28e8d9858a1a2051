// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Process supervisor: spawns a project's dev-server child
//! process, captures its output, detects the port it bound, and reports
//! lifecycle events upstream.
//!
//! The tracked-process table is the single process-wide anchor: the one
//! `ProcessSupervisor` instance the runner binary constructs at startup and
//! threads through every command handler. It is the source of truth for
//! logs and for process-exit notifications.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use rb_core::id::ProjectId;
use rb_wire::{EventBody, LogStream, RunnerEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SupervisorError;

/// A dev server is flagged a "quick exit" (probable startup failure) if it
/// terminates within this long of spawning.
const QUICK_EXIT_THRESHOLD: Duration = Duration::from_secs(5);
/// Grace period between the graceful signal and the forced kill.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(2);
/// Bound on the per-project log backlog kept for `fetch-logs` replay.
/// Oldest lines fall off once this many are buffered.
const LOG_BACKLOG_CAPACITY: usize = 2000;

/// Ordered port-detection patterns. The first match with
/// a value in `[3000, 65535]` wins.
#[allow(clippy::unwrap_used)] // fixed literal patterns, infallible by construction
fn port_patterns() -> &'static [regex::Regex; 4] {
    use std::sync::OnceLock;
    static PATTERNS: OnceLock<[regex::Regex; 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            regex::Regex::new(r"(?:localhost|127\.0\.0\.1|0\.0\.0\.0):(\d{4,5})").unwrap(),
            regex::Regex::new(r"port[:\s]+(\d{4,5})").unwrap(),
            regex::Regex::new(r"Local:.*?:(\d{4,5})").unwrap(),
            regex::Regex::new(r"ready.*?(\d{4,5})").unwrap(),
        ]
    })
}

/// Scan one output line against the ordered port patterns.
pub fn detect_port(line: &str) -> Option<u16> {
    for pattern in port_patterns() {
        if let Some(caps) = pattern.captures(line) {
            if let Some(m) = caps.get(1) {
                if let Ok(port) = m.as_str().parse::<u32>() {
                    if (3000..=65535).contains(&port) {
                        return Some(port as u16);
                    }
                }
            }
        }
    }
    None
}

struct Supervised {
    pid: u32,
    started_at: Instant,
    port_detected: Mutex<bool>,
    cancel: CancellationToken,
    /// Backlog of `(cursor, stream, line)` for `fetch-logs{since_cursor}`
    /// replay, bounded to [`LOG_BACKLOG_CAPACITY`].
    log_backlog: Mutex<VecDeque<(u64, LogStream, String)>>,
}

fn push_backlog(backlog: &Mutex<VecDeque<(u64, LogStream, String)>>, cursor: u64, stream: LogStream, line: String) {
    let mut backlog = backlog.lock();
    if backlog.len() >= LOG_BACKLOG_CAPACITY {
        backlog.pop_front();
    }
    backlog.push_back((cursor, stream, line));
}

/// Spawns and tracks dev-server child processes, one per project.
pub struct ProcessSupervisor {
    tracked: Arc<Mutex<HashMap<ProjectId, Arc<Supervised>>>>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self { tracked: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn is_tracked(&self, project_id: &ProjectId) -> bool {
        self.tracked.lock().contains_key(project_id)
    }

    /// Start (or restart) the dev server for `project_id`.
    /// Events are emitted to `events` as they happen; the call returns once
    /// the child has been spawned, not once it has become ready.
    pub async fn start_dev_server(
        &self,
        project_id: ProjectId,
        run_command: String,
        cwd: PathBuf,
        env: Vec<(String, String)>,
        events: mpsc::Sender<RunnerEvent>,
    ) -> Result<u32, SupervisorError> {
        if self.is_tracked(&project_id) {
            self.stop_dev_server(project_id, None).await;
        }

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&run_command)
            .current_dir(&cwd)
            .env("CI", "false")
            .env("NO_COLOR", "1")
            .env("FORCE_COLOR", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        for (key, value) in &env {
            command.env(key, value);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| SupervisorError::SpawnFailed(e.to_string()))?;
        let pid = child.id().ok_or_else(|| SupervisorError::SpawnFailed("child exited immediately".into()))?;
        let started_at = Instant::now();
        let cancel = CancellationToken::new();

        let supervised = Arc::new(Supervised {
            pid,
            started_at,
            port_detected: Mutex::new(false),
            cancel: cancel.clone(),
            log_backlog: Mutex::new(VecDeque::with_capacity(LOG_BACKLOG_CAPACITY)),
        });
        self.tracked.lock().insert(project_id, supervised.clone());

        info!(%project_id, pid, command = %run_command, "dev server spawned");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::SpawnFailed("child has no stdout pipe".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SupervisorError::SpawnFailed("child has no stderr pipe".into()))?;
        let cursor = Arc::new(AtomicU64::new(0));

        tokio::spawn(stream_reader(project_id, LogStream::Stdout, stdout, cursor.clone(), supervised.clone(), events.clone()));
        tokio::spawn(stream_reader(project_id, LogStream::Stderr, stderr, cursor, supervised.clone(), events.clone()));

        let tracked = self.tracked.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                () = cancel.cancelled() => {
                    // Forced kill already in flight via stop_dev_server; just
                    // reap the child so it doesn't become a zombie.
                    child.wait().await
                }
            };
            let duration = started_at.elapsed();
            let quick_exit = duration < QUICK_EXIT_THRESHOLD;
            let (exit_code, signal) = match &status {
                Ok(status) => (status.code(), unix_signal(status)),
                Err(_) => (None, None),
            };
            tracked.lock().remove(&project_id);
            let _ = events
                .send(RunnerEvent::for_project(
                    project_id,
                    0,
                    EventBody::ProcessExited {
                        exit_code,
                        signal,
                        duration_ms: duration.as_millis() as u64,
                        quick_exit,
                    },
                ))
                .await;
            info!(%project_id, pid, quick_exit, ?exit_code, "dev server exited");
        });

        Ok(pid)
    }

    /// Stop the dev server for `project_id`. Idempotent:
    /// stopping an untracked project is a no-op. `listening_port`, if
    /// known, is used for the belt-and-braces kill-by-port step.
    pub async fn stop_dev_server(&self, project_id: ProjectId, listening_port: Option<u16>) {
        let Some(supervised) = self.tracked.lock().remove(&project_id) else { return };
        // The child is spawned with `process_group(0)`, so its pid is also
        // its pgid; signalling the negated pid reaches the whole tree
        // instead of just the `sh -c` process.
        let pgid = Pid::from_raw(-(supervised.pid as i32));

        let _ = kill(pgid, Signal::SIGTERM);
        tokio::time::sleep(STOP_GRACE_PERIOD).await;
        let _ = kill(pgid, Signal::SIGKILL);
        supervised.cancel.cancel();

        if let Some(port) = listening_port {
            kill_anything_listening_on(port);
        }
        info!(%project_id, pid = supervised.pid, "dev server stopped");
    }

    /// `fetch-logs`: replay buffered log lines newer than
    /// `since_cursor` (exclusive), oldest first. Returns an empty vec for an
    /// untracked project or once the backlog has nothing newer.
    pub fn fetch_logs(&self, project_id: &ProjectId, since_cursor: Option<u64>) -> Vec<(u64, LogStream, String)> {
        let Some(supervised) = self.tracked.lock().get(project_id).cloned() else { return Vec::new() };
        supervised
            .log_backlog
            .lock()
            .iter()
            .filter(|(cursor, _, _)| match since_cursor {
                Some(since) => *cursor > since,
                None => true,
            })
            .cloned()
            .collect()
    }
}

/// Belt-and-braces: explicitly kill whatever is still bound to `port` after
/// the supervised process tree was signalled. Best-effort, never fatal if
/// nothing is listening or the platform tools to find it are unavailable.
fn kill_anything_listening_on(port: u16) {
    if std::net::TcpListener::bind(("127.0.0.1", port)).is_ok() {
        return; // nothing was listening
    }

    #[cfg(target_os = "linux")]
    {
        match pid_listening_on(port) {
            Some(pid) => {
                let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
                warn!(port, pid, "killed a lingering process still bound to the released dev-server port");
            }
            None => {
                warn!(port, "a process is still bound to the released dev-server port, but it could not be identified");
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        warn!(port, "a process is still bound to the released dev-server port after stop");
    }
}

/// Resolve the pid of the process with a listening socket on `port` by
/// matching `/proc/net/tcp{,6}`'s inode column against `/proc/*/fd/*`
/// symlinks. Returns the first match; `None` if nothing is found or `/proc`
/// is unreadable.
#[cfg(target_os = "linux")]
fn pid_listening_on(port: u16) -> Option<i32> {
    const TCP_LISTEN_STATE: &str = "0A";
    let port_hex = format!("{port:04X}");

    let mut inodes = Vec::new();
    for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(contents) = std::fs::read_to_string(path) else { continue };
        for line in contents.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (Some(local_address), Some(state), Some(inode)) = (fields.first(), fields.get(3), fields.get(9))
            else {
                continue;
            };
            let Some((_, local_port)) = local_address.split_once(':') else { continue };
            if *state == TCP_LISTEN_STATE && local_port.eq_ignore_ascii_case(&port_hex) {
                if let Ok(inode) = inode.parse::<u64>() {
                    inodes.push(inode);
                }
            }
        }
    }
    if inodes.is_empty() {
        return None;
    }

    let proc_dir = std::fs::read_dir("/proc").ok()?;
    for entry in proc_dir.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else { continue };
        let fd_dir = entry.path().join("fd");
        let Ok(fds) = std::fs::read_dir(&fd_dir) else { continue };
        for fd in fds.flatten() {
            let Ok(target) = std::fs::read_link(fd.path()) else { continue };
            let target = target.to_string_lossy();
            if let Some(inode_str) = target.strip_prefix("socket:[").and_then(|s| s.strip_suffix(']')) {
                if let Ok(inode) = inode_str.parse::<u64>() {
                    if inodes.contains(&inode) {
                        return Some(pid);
                    }
                }
            }
        }
    }
    None
}

fn unix_signal(status: &std::process::ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

async fn stream_reader(
    project_id: ProjectId,
    stream: LogStream,
    reader: impl tokio::io::AsyncRead + Unpin,
    cursor: Arc<AtomicU64>,
    supervised: Arc<Supervised>,
    events: mpsc::Sender<RunnerEvent>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let at = cursor.fetch_add(1, Ordering::Relaxed);
                if !*supervised.port_detected.lock() {
                    if let Some(port) = detect_port(&line) {
                        *supervised.port_detected.lock() = true;
                        let _ = events
                            .send(RunnerEvent::for_project(project_id, 0, EventBody::PortDetected { port }))
                            .await;
                    }
                }
                let _ = events
                    .send(RunnerEvent::for_project(project_id, 0, EventBody::LogChunk { stream, cursor: at, data: line }))
                    .await;
            }
            Ok(None) => break,
            Err(e) => {
                warn!(%project_id, error = %e, "log stream reader failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_localhost_port() {
        assert_eq!(detect_port("Listening on http://localhost:3001"), Some(3001));
    }

    #[test]
    fn detects_bind_all_port() {
        assert_eq!(detect_port("Server bound to 0.0.0.0:8080"), Some(8080));
    }

    #[test]
    fn detects_port_keyword() {
        assert_eq!(detect_port("starting on port: 4321"), Some(4321));
    }

    #[test]
    fn detects_vite_local_line() {
        assert_eq!(detect_port("  Local:   http://localhost:5173/"), Some(5173));
    }

    #[test]
    fn detects_ready_line() {
        assert_eq!(detect_port("ready - started server on 3000"), Some(3000));
    }

    #[test]
    fn rejects_ports_outside_the_valid_range() {
        assert_eq!(detect_port("port: 80"), None);
        assert_eq!(detect_port("port: 99999"), None);
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(detect_port("installing dependencies..."), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pid_listening_on_resolves_a_socket_this_process_owns() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let found = pid_listening_on(port).expect("the listening pid is resolvable");
        assert_eq!(found, std::process::id() as i32);
        drop(listener);
    }
}
