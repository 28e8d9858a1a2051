// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Command dispatcher: one FIFO queue per runner. Commands enqueued before
//! `t` are written to the socket strictly before anything enqueued after
//! `t`, for the same `runnerId` — enforced here by the single writer task
//! owning each connection's `mpsc::Receiver` and draining it in order.

use std::sync::Arc;
use std::time::Duration;

use rb_core::id::{CommandId, RunnerId};
use rb_wire::Command;
use tokio::sync::oneshot;

use crate::error::BrokerError;
use crate::registry::ConnectionRegistry;

/// A command en route to a runner, plus the channel its eventual `ack` (or
/// disconnect) is delivered through.
struct Waiter {
    ack_tx: oneshot::Sender<()>,
}

#[derive(Default)]
pub struct PendingAcks {
    waiters: parking_lot::Mutex<std::collections::HashMap<CommandId, Waiter>>,
}

impl PendingAcks {
    pub fn register(&self, command_id: CommandId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(command_id, Waiter { ack_tx: tx });
        rx
    }

    /// Called by the event router when an `ack` event arrives.
    pub fn resolve(&self, command_id: &CommandId) {
        if let Some(waiter) = self.waiters.lock().remove(command_id) {
            let _ = waiter.ack_tx.send(());
        }
    }

    pub fn forget(&self, command_id: &CommandId) {
        self.waiters.lock().remove(command_id);
    }
}

pub struct CommandDispatcher {
    registry: Arc<ConnectionRegistry>,
    acks: Arc<PendingAcks>,
    ack_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, acks: Arc<PendingAcks>, ack_timeout: Duration) -> Self {
        Self { registry, acks, ack_timeout }
    }

    /// Enqueue `command` for `runner_id`, wait for its `ack`, retrying
    /// the send once on timeout (at most two attempts total).
    pub async fn send(&self, runner_id: RunnerId, command: Command) -> Result<(), BrokerError> {
        for attempt in 0..2 {
            let Some(conn) = self.registry.get(&runner_id) else {
                return Err(BrokerError::RunnerDisconnected);
            };

            let ack_rx = self.acks.register(command.id);
            conn.track_in_flight(command.id);
            if conn.command_tx.send(command.clone()).await.is_err() {
                self.acks.forget(&command.id);
                conn.untrack_in_flight(&command.id);
                // The writer task is gone; the connection is as good as
                // disconnected even if the registry hasn't noticed yet.
                continue;
            }

            tokio::select! {
                ack = ack_rx => {
                    conn.untrack_in_flight(&command.id);
                    if ack.is_ok() {
                        return Ok(());
                    }
                    // Sender dropped without resolving: session closed mid-flight.
                }
                _ = conn.cancel.cancelled() => {
                    self.acks.forget(&command.id);
                    conn.untrack_in_flight(&command.id);
                }
                _ = tokio::time::sleep(self.ack_timeout) => {
                    self.acks.forget(&command.id);
                    conn.untrack_in_flight(&command.id);
                    if attempt == 0 {
                        continue;
                    }
                    return Err(BrokerError::Timeout);
                }
            }
        }
        Err(BrokerError::RunnerDisconnected)
    }

    /// Fire-and-forget enqueue with no ack wait, used for commands where
    /// the caller does not block on delivery (e.g. a best-effort health
    /// probe to an otherwise-idle runner).
    pub async fn enqueue_no_ack(&self, runner_id: RunnerId, command: Command) -> Result<(), BrokerError> {
        let conn = self.registry.get(&runner_id).ok_or(BrokerError::RunnerDisconnected)?;
        conn.command_tx.send(command).await.map_err(|_| BrokerError::RunnerDisconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RunnerConnection;
    use rb_core::id::ProjectId;
    use rb_wire::CommandBody;
    use tokio::sync::mpsc;

    fn test_command() -> Command {
        Command::new(ProjectId::new(), 0, CommandBody::RunnerHealthCheck)
    }

    #[tokio::test]
    async fn send_resolves_once_the_router_acks_the_command() {
        let registry = Arc::new(ConnectionRegistry::default());
        let acks = Arc::new(PendingAcks::default());
        let dispatcher = CommandDispatcher::new(registry.clone(), acks.clone(), Duration::from_secs(5));

        let runner_id = RunnerId::new();
        let (tx, mut rx) = mpsc::channel(8);
        registry.attach(Arc::new(RunnerConnection::new(runner_id, None, 0, tx)));

        let command = test_command();
        let command_id = command.id;
        let send_fut = dispatcher.send(runner_id, command);

        let delivered = rx.recv().await.expect("command delivered to writer task");
        assert_eq!(delivered.id, command_id);
        acks.resolve(&command_id);

        send_fut.await.expect("dispatcher resolves on ack");
    }

    #[tokio::test]
    async fn send_without_a_connection_fails_fast() {
        let registry = Arc::new(ConnectionRegistry::default());
        let acks = Arc::new(PendingAcks::default());
        let dispatcher = CommandDispatcher::new(registry, acks, Duration::from_millis(50));

        let err = dispatcher.send(RunnerId::new(), test_command()).await.unwrap_err();
        assert!(matches!(err, BrokerError::RunnerDisconnected));
    }

    #[tokio::test]
    async fn send_retries_once_then_times_out() {
        let registry = Arc::new(ConnectionRegistry::default());
        let acks = Arc::new(PendingAcks::default());
        let dispatcher = CommandDispatcher::new(registry.clone(), acks, Duration::from_millis(20));

        let runner_id = RunnerId::new();
        let (tx, mut rx) = mpsc::channel(8);
        registry.attach(Arc::new(RunnerConnection::new(runner_id, None, 0, tx)));

        let command = test_command();
        let started = std::time::Instant::now();
        let result = dispatcher.send(runner_id, command).await;
        assert!(matches!(result, Err(BrokerError::Timeout)));
        // Two ack-timeout windows elapsed (attempt 0 retried, attempt 1 failed).
        assert!(started.elapsed() >= Duration::from_millis(40));

        // Both attempts reached the writer task.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn send_fails_with_disconnected_when_cancelled_mid_flight() {
        let registry = Arc::new(ConnectionRegistry::default());
        let acks = Arc::new(PendingAcks::default());
        let dispatcher = CommandDispatcher::new(registry.clone(), acks, Duration::from_secs(5));

        let runner_id = RunnerId::new();
        let (tx, _rx) = mpsc::channel(8);
        let conn = Arc::new(RunnerConnection::new(runner_id, None, 0, tx));
        registry.attach(conn.clone());

        let send_fut = dispatcher.send(runner_id, test_command());
        conn.close();
        // Displace so the registry no longer returns a connection on retry.
        registry.detach(&runner_id, &conn);

        let result = send_fut.await;
        assert!(matches!(result, Err(BrokerError::RunnerDisconnected)));
    }

    proptest::proptest! {
        /// However long the ack takes to arrive, as long as it arrives
        /// before the timeout window closes, `send` resolves `Ok`.
        #[test]
        fn ack_arriving_within_the_timeout_always_resolves_ok(delay_ms in 0u64..15) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let registry = Arc::new(ConnectionRegistry::default());
                let acks = Arc::new(PendingAcks::default());
                let dispatcher = CommandDispatcher::new(registry.clone(), acks.clone(), Duration::from_millis(200));

                let runner_id = RunnerId::new();
                let (tx, mut rx) = mpsc::channel(8);
                registry.attach(Arc::new(RunnerConnection::new(runner_id, None, 0, tx)));

                let command = test_command();
                let command_id = command.id;
                let send_fut = dispatcher.send(runner_id, command);

                let acks_clone = acks.clone();
                let acker = tokio::spawn(async move {
                    rx.recv().await.expect("command delivered");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    acks_clone.resolve(&command_id);
                });

                let result = send_fut.await;
                acker.await.unwrap();
                prop_assert!(result.is_ok());
                Ok(())
            })?;
        }
    }
}
