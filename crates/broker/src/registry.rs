// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry: tracks live runner attachments behind a single
//! short-held lock. `Attach` displaces any prior entry for the same
//! `runnerId`, closing its send sink so anything waiting on it observes a
//! closed signal and aborts cleanly.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rb_core::id::{CommandId, RunnerId, RunnerKeyId, UserId};
use rb_wire::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A live runner attachment. `cancel` is the send-sink's closed signal:
/// displacement, heartbeat timeout, and graceful shutdown all go through it.
pub struct RunnerConnection {
    pub runner_id: RunnerId,
    pub user_id: Option<UserId>,
    /// The runner key this attachment authenticated with, absent in local
    /// mode.
    pub key_id: Option<RunnerKeyId>,
    pub attached_at_ms: u64,
    last_heartbeat_at_ms: AtomicU64,
    pub command_tx: mpsc::Sender<Command>,
    pub cancel: CancellationToken,
    /// Commands dispatched to this runner awaiting an `ack`. On `Closed`,
    /// every in-flight command's subscription must see `RunnerDisconnected`.
    in_flight: Mutex<HashSet<CommandId>>,
}

impl RunnerConnection {
    pub fn new(
        runner_id: RunnerId,
        user_id: Option<UserId>,
        attached_at_ms: u64,
        command_tx: mpsc::Sender<Command>,
    ) -> Self {
        Self::with_key(runner_id, user_id, None, attached_at_ms, command_tx)
    }

    pub fn with_key(
        runner_id: RunnerId,
        user_id: Option<UserId>,
        key_id: Option<RunnerKeyId>,
        attached_at_ms: u64,
        command_tx: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            runner_id,
            user_id,
            key_id,
            attached_at_ms,
            last_heartbeat_at_ms: AtomicU64::new(attached_at_ms),
            command_tx,
            cancel: CancellationToken::new(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn track_in_flight(&self, command_id: CommandId) {
        self.in_flight.lock().insert(command_id);
    }

    pub fn untrack_in_flight(&self, command_id: &CommandId) {
        self.in_flight.lock().remove(command_id);
    }

    /// Drain and return every command still awaiting an ack. Called once,
    /// when the session tears down, so each can be failed out to its
    /// subscribers exactly once.
    pub fn drain_in_flight(&self) -> Vec<CommandId> {
        self.in_flight.lock().drain().collect()
    }

    pub fn last_heartbeat_at_ms(&self) -> u64 {
        self.last_heartbeat_at_ms.load(Ordering::Relaxed)
    }

    pub fn touch_heartbeat(&self, now_ms: u64) {
        self.last_heartbeat_at_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<RunnerId, Arc<RunnerConnection>>>,
}

impl ConnectionRegistry {
    /// Install `conn`, displacing and closing any prior entry for the same
    /// `runnerId`. Returns the displaced connection, if any.
    pub fn attach(&self, conn: Arc<RunnerConnection>) -> Option<Arc<RunnerConnection>> {
        let displaced = {
            let mut connections = self.connections.lock();
            connections.insert(conn.runner_id, conn)
        };
        if let Some(displaced) = &displaced {
            displaced.close();
        }
        displaced
    }

    /// Remove `runner_id`'s entry, but only if it is still `expected` — a
    /// session whose connection was already displaced must not remove the
    /// newer one that replaced it.
    pub fn detach(&self, runner_id: &RunnerId, expected: &Arc<RunnerConnection>) -> bool {
        let mut connections = self.connections.lock();
        if let Some(current) = connections.get(runner_id) {
            if Arc::ptr_eq(current, expected) {
                connections.remove(runner_id);
                return true;
            }
        }
        false
    }

    pub fn get(&self, runner_id: &RunnerId) -> Option<Arc<RunnerConnection>> {
        self.connections.lock().get(runner_id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<RunnerConnection>> {
        self.connections.lock().values().cloned().collect()
    }

    pub fn record_heartbeat(&self, runner_id: &RunnerId, now_ms: u64) -> bool {
        match self.connections.lock().get(runner_id) {
            Some(conn) => {
                conn.touch_heartbeat(now_ms);
                true
            }
            None => false,
        }
    }

    /// Evict and close every connection whose last heartbeat predates
    /// `now_ms - timeout_ms`. Returns the evicted connections so the caller
    /// can notify in-flight waiters (`RunnerDisconnected`).
    pub fn sweep_stale(&self, now_ms: u64, timeout_ms: u64) -> Vec<Arc<RunnerConnection>> {
        let stale: Vec<Arc<RunnerConnection>> = {
            let mut connections = self.connections.lock();
            let stale_ids: Vec<RunnerId> = connections
                .iter()
                .filter(|(_, conn)| now_ms.saturating_sub(conn.last_heartbeat_at_ms()) > timeout_ms)
                .map(|(id, _)| *id)
                .collect();
            stale_ids.iter().filter_map(|id| connections.remove(id)).collect()
        };
        for conn in &stale {
            conn.close();
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn conn(runner_id: RunnerId) -> Arc<RunnerConnection> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(RunnerConnection::new(runner_id, None, 0, tx))
    }

    #[test]
    fn attach_displaces_and_closes_the_prior_connection() {
        let registry = ConnectionRegistry::default();
        let runner_id = RunnerId::new();
        let first = conn(runner_id);
        assert!(registry.attach(first.clone()).is_none());

        let second = conn(runner_id);
        let displaced = registry.attach(second.clone()).expect("prior connection displaced");
        assert!(Arc::ptr_eq(&displaced, &first));
        assert!(first.is_closed());
        assert!(!second.is_closed());

        let current = registry.get(&runner_id).expect("current connection present");
        assert!(Arc::ptr_eq(&current, &second));
    }

    #[test]
    fn detach_only_removes_the_expected_connection() {
        let registry = ConnectionRegistry::default();
        let runner_id = RunnerId::new();
        let first = conn(runner_id);
        registry.attach(first.clone());
        let second = conn(runner_id);
        registry.attach(second.clone());

        // The first session's own detach call must not evict the second.
        assert!(!registry.detach(&runner_id, &first));
        assert!(registry.get(&runner_id).is_some());

        assert!(registry.detach(&runner_id, &second));
        assert!(registry.get(&runner_id).is_none());
    }

    #[test]
    fn sweep_stale_evicts_only_expired_heartbeats() {
        let registry = ConnectionRegistry::default();
        let fresh = conn(RunnerId::new());
        let stale = conn(RunnerId::new());
        stale.touch_heartbeat(0);
        fresh.touch_heartbeat(9_000);
        registry.attach(fresh.clone());
        registry.attach(stale.clone());

        let evicted = registry.sweep_stale(10_000, 5_000);
        assert_eq!(evicted.len(), 1);
        assert!(Arc::ptr_eq(&evicted[0], &stale));
        assert!(stale.is_closed());
        assert!(!fresh.is_closed());
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn drain_in_flight_returns_each_tracked_command_once() {
        let connection = conn(RunnerId::new());
        let a = CommandId::new();
        let b = CommandId::new();
        connection.track_in_flight(a);
        connection.track_in_flight(b);
        connection.untrack_in_flight(&a);

        let drained = connection.drain_in_flight();
        assert_eq!(drained, vec![b]);
        assert!(connection.drain_in_flight().is_empty());
    }

    #[test]
    fn at_most_one_live_entry_per_runner_id_after_any_sequence() {
        let registry = ConnectionRegistry::default();
        let runner_id = RunnerId::new();
        for _ in 0..5 {
            registry.attach(conn(runner_id));
        }
        assert_eq!(registry.list().iter().filter(|c| c.runner_id == runner_id).count(), 1);
    }

    proptest::proptest! {
        /// Whatever number of times a runner re-attaches, every displaced
        /// connection ends up closed and only the last one installed
        /// survives as `get`'s answer.
        #[test]
        fn repeated_attach_always_leaves_exactly_the_last_one_live(attach_count in 1usize..12) {
            let registry = ConnectionRegistry::default();
            let runner_id = RunnerId::new();
            let mut attached = Vec::new();
            for _ in 0..attach_count {
                attached.push(conn(runner_id));
                registry.attach(attached.last().unwrap().clone());
            }
            let last = attached.last().unwrap();
            let current = registry.get(&runner_id).expect("a connection is live");
            prop_assert!(Arc::ptr_eq(&current, last));
            for displaced in &attached[..attached.len() - 1] {
                prop_assert!(displaced.is_closed());
            }
            prop_assert!(!last.is_closed());
        }
    }
}
