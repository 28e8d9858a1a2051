// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Event router: fans events arriving on any runner session out to
//! subscribers keyed by `commandId` or `projectId`, and applies the
//! persistence side effects that ride along with certain event kinds.
//!
//! Delivery is best-effort per sink: a subscriber that can't keep up is
//! dropped rather than allowed to block the session's read loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rb_core::id::{CommandId, ProjectId, RunnerId};
use rb_storage::{ProjectRepository, RunningProcessRepository};
use rb_wire::{EventBody, RunnerEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dispatch::PendingAcks;
use crate::ports::PortAllocator;
use crate::registry::ConnectionRegistry;

pub type EventSink = mpsc::Sender<RunnerEvent>;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

fn next_subscription_id() -> SubscriptionId {
    SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Default)]
struct Subscribers<K> {
    by_key: HashMap<K, Vec<(SubscriptionId, EventSink)>>,
}

impl<K: std::hash::Hash + Eq + Clone> Subscribers<K> {
    fn subscribe(&mut self, key: K, capacity: usize) -> (SubscriptionId, mpsc::Receiver<RunnerEvent>) {
        let id = next_subscription_id();
        let (tx, rx) = mpsc::channel(capacity);
        self.by_key.entry(key).or_default().push((id, tx));
        (id, rx)
    }

    fn unsubscribe(&mut self, key: &K, id: SubscriptionId) {
        if let Some(sinks) = self.by_key.get_mut(key) {
            sinks.retain(|(existing, _)| *existing != id);
            if sinks.is_empty() {
                self.by_key.remove(key);
            }
        }
    }

    /// Best-effort fan-out. Returns the number of sinks the event reached.
    fn dispatch(&mut self, key: &K, event: &RunnerEvent) -> usize {
        let Some(sinks) = self.by_key.get_mut(key) else { return 0 };
        sinks.retain(|(_, sink)| sink.try_send(event.clone()).is_ok());
        let delivered = sinks.len();
        if sinks.is_empty() {
            self.by_key.remove(key);
        }
        delivered
    }
}

pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
    acks: Arc<PendingAcks>,
    projects: Arc<dyn ProjectRepository>,
    processes: Arc<dyn RunningProcessRepository>,
    ports: Arc<PortAllocator>,
    by_command: parking_lot::Mutex<Subscribers<CommandId>>,
    by_project: parking_lot::Mutex<Subscribers<ProjectId>>,
    status: parking_lot::Mutex<Vec<(SubscriptionId, EventSink)>>,
    sink_capacity: usize,
}

impl EventRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        acks: Arc<PendingAcks>,
        projects: Arc<dyn ProjectRepository>,
        processes: Arc<dyn RunningProcessRepository>,
        ports: Arc<PortAllocator>,
        sink_capacity: usize,
    ) -> Self {
        Self {
            registry,
            acks,
            projects,
            processes,
            ports,
            by_command: parking_lot::Mutex::new(Subscribers::default()),
            by_project: parking_lot::Mutex::new(Subscribers::default()),
            status: parking_lot::Mutex::new(Vec::new()),
            sink_capacity,
        }
    }

    pub fn subscribe_command(&self, command_id: CommandId) -> (SubscriptionId, mpsc::Receiver<RunnerEvent>) {
        self.by_command.lock().subscribe(command_id, self.sink_capacity)
    }

    pub fn unsubscribe_command(&self, command_id: CommandId, id: SubscriptionId) {
        self.by_command.lock().unsubscribe(&command_id, id);
    }

    pub fn subscribe_project(&self, project_id: ProjectId) -> (SubscriptionId, mpsc::Receiver<RunnerEvent>) {
        self.by_project.lock().subscribe(project_id, self.sink_capacity)
    }

    pub fn unsubscribe_project(&self, project_id: ProjectId, id: SubscriptionId) {
        self.by_project.lock().unsubscribe(&project_id, id);
    }

    pub fn subscribe_status(&self) -> (SubscriptionId, mpsc::Receiver<RunnerEvent>) {
        let id = next_subscription_id();
        let (tx, rx) = mpsc::channel(self.sink_capacity);
        self.status.lock().push((id, tx));
        (id, rx)
    }

    /// Route one event received from `runner_id`'s session.
    pub async fn route(&self, runner_id: RunnerId, event: RunnerEvent) {
        if let EventBody::Ack = &event.body {
            if let Some(command_id) = event.command_id {
                self.acks.resolve(&command_id);
            }
        }

        if matches!(event.body, EventBody::RunnerStatus { .. }) {
            self.registry.record_heartbeat(&runner_id, event.timestamp_ms);
            let mut status = self.status.lock();
            status.retain(|(_, sink)| sink.try_send(event.clone()).is_ok());
        }

        if let Some(command_id) = event.command_id {
            let delivered = self.by_command.lock().dispatch(&command_id, &event);
            debug!(%command_id, delivered, "routed command-scoped event");
            if event.is_terminal() {
                self.by_command.lock().by_key.remove(&command_id);
            }
        }

        if let Some(project_id) = event.project_id {
            self.apply_project_side_effects(project_id, &event).await;
            self.by_project.lock().dispatch(&project_id, &event);
        }
    }

    /// Fail a still-in-flight command out to its subscribers as the session
    /// that owned it tears down: every `commandId` subscription tied to an
    /// in-flight command on this runner receives `RunnerDisconnected` and
    /// closes.
    pub fn disconnect_command(&self, runner_id: RunnerId, command_id: CommandId) {
        let event = RunnerEvent::for_command(
            command_id,
            0,
            EventBody::Error { message: format!("runner {runner_id} disconnected") },
        );
        let delivered = self.by_command.lock().dispatch(&command_id, &event);
        debug!(%command_id, %runner_id, delivered, "failed in-flight command out on disconnect");
        self.by_command.lock().by_key.remove(&command_id);
    }

    async fn apply_project_side_effects(&self, project_id: ProjectId, event: &RunnerEvent) {
        let Ok(Some(mut project)) = self.projects.get(&project_id).await else {
            warn!(%project_id, "event for unknown project dropped its side effect");
            return;
        };

        match &event.body {
            EventBody::PortDetected { port } => {
                // Idempotent: re-applying the same port is a no-op write.
                project.dev_server_port = Some(*port);
                project.dev_server_status = rb_core::DevServerStatus::Running;
                let _ = self.projects.upsert(project).await;
            }
            EventBody::TunnelCreated { url, .. } => {
                project.tunnel_url = Some(url.clone());
                let _ = self.projects.upsert(project).await;
            }
            EventBody::TunnelClosed { .. } => {
                project.tunnel_url = None;
                let _ = self.projects.upsert(project).await;
            }
            EventBody::ProcessExited { .. } => {
                project.dev_server_status = rb_core::DevServerStatus::Stopped;
                project.dev_server_port = None;
                project.dev_server_pid = None;
                let _ = self.projects.upsert(project).await;
                let _ = self.processes.unregister(&project_id).await;
                // Port-release failures are logged, never fail the unregister.
                if let Err(e) = self.ports.release(&project_id).await {
                    warn!(%project_id, error = %e, "port release failed during process unregister");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rb_core::{Clock, FakeClock, Project};
    use rb_storage::{MemoryPortAllocationRepository, MemoryProjectRepository, MemoryRunningProcessRepository};

    fn router() -> (EventRouter, Arc<MemoryProjectRepository>) {
        let registry = Arc::new(ConnectionRegistry::default());
        let acks = Arc::new(PendingAcks::default());
        let projects = Arc::new(MemoryProjectRepository::default());
        let processes = Arc::new(MemoryRunningProcessRepository::default());
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
        let ports = Arc::new(PortAllocator::new(
            Arc::new(MemoryPortAllocationRepository::default()),
            processes.clone(),
            clock,
            3001,
            4000,
            std::time::Duration::from_secs(600),
        ));
        let router = EventRouter::new(registry, acks, projects.clone(), processes, ports, 16);
        (router, projects)
    }

    #[tokio::test]
    async fn command_scoped_event_reaches_only_its_subscriber() {
        let (router, _projects) = router();
        let command_id = CommandId::new();
        let other_command_id = CommandId::new();
        let (_id, mut rx) = router.subscribe_command(command_id);
        let (_id2, mut other_rx) = router.subscribe_command(other_command_id);

        let event = RunnerEvent::for_command(command_id, 0, EventBody::BuildProgress { message: "x".into() });
        router.route(RunnerId::new(), event).await;

        assert!(rx.try_recv().is_ok());
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn terminal_event_closes_the_command_subscription() {
        let (router, _projects) = router();
        let command_id = CommandId::new();
        let (id, mut rx) = router.subscribe_command(command_id);

        let event = RunnerEvent::for_command(command_id, 0, EventBody::BuildFailed { error: "x".into(), stack: None });
        router.route(RunnerId::new(), event).await;
        assert!(rx.try_recv().is_ok());

        // The subscription was removed as a side effect of routing the
        // terminal event, so a second event never reaches the old receiver.
        let event2 = RunnerEvent::for_command(command_id, 1, EventBody::BuildProgress { message: "late".into() });
        router.route(RunnerId::new(), event2).await;
        assert!(rx.try_recv().is_err());
        router.unsubscribe_command(command_id, id);
    }

    #[tokio::test]
    async fn port_detected_twice_leaves_project_state_unchanged_on_second_apply() {
        let (router, projects) = router();
        let project_id = ProjectId::new();
        projects.upsert(Project::new(project_id, "demo", 0)).await.unwrap();

        let event = RunnerEvent::for_project(project_id, 0, EventBody::PortDetected { port: 3001 });
        router.route(RunnerId::new(), event.clone()).await;
        let after_first = projects.get(&project_id).await.unwrap().unwrap();
        router.route(RunnerId::new(), event).await;
        let after_second = projects.get(&project_id).await.unwrap().unwrap();

        assert_eq!(after_first, after_second);
        assert_eq!(after_second.dev_server_port, Some(3001));
    }

    #[tokio::test]
    async fn process_exited_clears_dev_server_fields() {
        let (router, projects) = router();
        let project_id = ProjectId::new();
        let mut project = Project::new(project_id, "demo", 0);
        project.dev_server_status = rb_core::DevServerStatus::Running;
        project.dev_server_port = Some(3001);
        projects.upsert(project).await.unwrap();

        let event = RunnerEvent::for_project(
            project_id,
            0,
            EventBody::ProcessExited { exit_code: Some(0), signal: None, duration_ms: 1000, quick_exit: false },
        );
        router.route(RunnerId::new(), event).await;

        let after = projects.get(&project_id).await.unwrap().unwrap();
        assert_eq!(after.dev_server_status, rb_core::DevServerStatus::Stopped);
        assert!(after.dev_server_port.is_none());
    }

    #[tokio::test]
    async fn disconnect_command_delivers_a_terminal_error_and_closes_the_subscription() {
        let (router, _projects) = router();
        let command_id = CommandId::new();
        let (_id, mut rx) = router.subscribe_command(command_id);

        router.disconnect_command(RunnerId::new(), command_id);
        let event = rx.try_recv().expect("error event delivered");
        assert!(matches!(event.body, EventBody::Error { .. }));
        assert!(event.is_terminal());
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_without_blocking_delivery_to_others() {
        let (router, _projects) = router();
        let command_id = CommandId::new();
        let (_id, rx) = router.subscribe_command(command_id);
        drop(rx); // simulate a subscriber that can never accept again

        let (_id2, mut healthy_rx) = router.subscribe_command(command_id);
        let event = RunnerEvent::for_command(command_id, 0, EventBody::Ack);
        router.route(RunnerId::new(), event).await;

        assert!(healthy_rx.try_recv().is_ok());
    }

    proptest::proptest! {
        /// However many subscribers are attached to a command at dispatch
        /// time, a single non-terminal event reaches every one of them
        /// exactly once.
        #[test]
        fn non_terminal_event_reaches_every_live_subscriber(subscriber_count in 1usize..10) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (router, _projects) = router();
                let command_id = CommandId::new();
                let mut receivers = Vec::new();
                for _ in 0..subscriber_count {
                    let (_id, rx) = router.subscribe_command(command_id);
                    receivers.push(rx);
                }

                let event = RunnerEvent::for_command(command_id, 0, EventBody::BuildProgress { message: "x".into() });
                router.route(RunnerId::new(), event).await;

                for rx in &mut receivers {
                    prop_assert!(rx.try_recv().is_ok());
                    prop_assert!(rx.try_recv().is_err(), "event delivered more than once");
                }
                Ok(())
            })?;
        }
    }
}
