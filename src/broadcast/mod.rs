//! Event delivery to connected clients.
//!
//! [`BroadcastChannel`] is the seam between job execution and the transport.
//! Two policies exist: [`GlobalFanout`] sends every event to every connection,
//! [`PerJobScoped`] only to connections that subscribed to the event's job.
//! Delivery never blocks the publisher; a connection whose bounded queue is
//! full is dropped from the registry.

pub mod event;
pub mod registry;

pub use event::JobEvent;
pub use registry::{
    Connection, ConnectionId, ConnectionRegistry, DeliveryError, RegisteredConnection, Replier,
};

use std::sync::Arc;

use crate::jobs::model::JobId;
use crate::types::Result;
use crate::utils::toml_config::BroadcastPolicy;

/// What happened to one published event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the event was queued on
    pub delivered: usize,
    /// Connections dropped because their queue overflowed
    pub dropped: Vec<ConnectionId>,
}

pub trait BroadcastChannel: Send + Sync {
    /// Queue `event` on every connection in scope. Never blocks.
    fn publish(&self, event: &JobEvent) -> DeliveryReport;

    /// Express interest in a job's events.
    fn subscribe(&self, connection: &ConnectionId, job: &JobId) -> Result<()>;

    /// Forget a finished job's subscriptions.
    fn release(&self, job: &JobId);

    fn policy(&self) -> BroadcastPolicy;
}

/// Build the channel selected by configuration.
pub fn for_policy(
    policy: BroadcastPolicy,
    registry: Arc<ConnectionRegistry>,
) -> Arc<dyn BroadcastChannel> {
    match policy {
        BroadcastPolicy::Global => Arc::new(GlobalFanout::new(registry)),
        BroadcastPolicy::PerJob => Arc::new(PerJobScoped::new(registry)),
    }
}

/// Send every event to every connection.
pub struct GlobalFanout {
    registry: Arc<ConnectionRegistry>,
}

impl GlobalFanout {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

impl BroadcastChannel for GlobalFanout {
    fn publish(&self, event: &JobEvent) -> DeliveryReport {
        dispatch(&self.registry, event, |_| true)
    }

    fn subscribe(&self, connection: &ConnectionId, _job: &JobId) -> Result<()> {
        // Everyone already receives everything; only check the connection exists.
        if self.registry.contains(connection) {
            Ok(())
        } else {
            Err(crate::types::AppError::NotFound(format!(
                "Connection '{}' not found",
                connection
            )))
        }
    }

    fn release(&self, _job: &JobId) {}

    fn policy(&self) -> BroadcastPolicy {
        BroadcastPolicy::Global
    }
}

/// Send a job's events only to connections subscribed to that job.
///
/// Events without a job (notices) still reach everyone.
pub struct PerJobScoped {
    registry: Arc<ConnectionRegistry>,
}

impl PerJobScoped {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

impl BroadcastChannel for PerJobScoped {
    fn publish(&self, event: &JobEvent) -> DeliveryReport {
        match event.research_id() {
            Some(job) => dispatch(&self.registry, event, |conn| conn.is_subscribed(job)),
            None => dispatch(&self.registry, event, |_| true),
        }
    }

    fn subscribe(&self, connection: &ConnectionId, job: &JobId) -> Result<()> {
        self.registry.subscribe(connection, job)
    }

    fn release(&self, job: &JobId) {
        self.registry.release_job(job);
    }

    fn policy(&self) -> BroadcastPolicy {
        BroadcastPolicy::PerJob
    }
}

/// Serialize once, then hand the frame to every connection in scope.
fn dispatch(
    registry: &ConnectionRegistry,
    event: &JobEvent,
    in_scope: impl Fn(&RegisteredConnection) -> bool,
) -> DeliveryReport {
    let payload: Arc<str> = match serde_json::to_string(event) {
        Ok(json) => json.into(),
        Err(e) => {
            tracing::error!(kind = event.kind(), error = %e, "failed to serialize event");
            return DeliveryReport::default();
        }
    };

    let mut report = DeliveryReport::default();
    let mut stale = Vec::new();

    registry.for_each(|id, conn| {
        if !in_scope(conn) {
            return;
        }
        match conn.try_deliver(&payload) {
            Ok(()) => report.delivered += 1,
            Err(DeliveryError::Full) => report.dropped.push(*id),
            Err(DeliveryError::Closed) => stale.push(*id),
        }
    });

    for id in &report.dropped {
        registry.drop_overloaded(id);
    }
    for id in &stale {
        registry.remove(id);
    }

    tracing::trace!(
        kind = event.kind(),
        delivered = report.delivered,
        dropped = report.dropped.len(),
        "event published"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn log_event(job: &str, seq: usize) -> JobEvent {
        JobEvent::Logs {
            research_id: job.into(),
            content: "progress".into(),
            output: seq.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    fn seq_of(frame: &str) -> usize {
        let value: serde_json::Value = serde_json::from_str(frame).unwrap();
        value["output"].as_str().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn test_global_fanout_reaches_everyone() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let channel = GlobalFanout::new(Arc::clone(&registry));
        let (_a, mut rx_a) = registry.add();
        let (_b, mut rx_b) = registry.add();

        let report = channel.publish(&log_event("task_1_a", 1));

        assert_eq!(report.delivered, 2);
        assert!(report.dropped.is_empty());
        assert_eq!(seq_of(&rx_a.recv().await.unwrap()), 1);
        assert_eq!(seq_of(&rx_b.recv().await.unwrap()), 1);
    }

    #[tokio::test]
    async fn test_slow_connection_is_dropped_without_affecting_others() {
        let registry = Arc::new(ConnectionRegistry::new(10));
        let channel = GlobalFanout::new(Arc::clone(&registry));
        let (slow, _slow_rx) = registry.add();
        let (_fast, mut fast_rx) = registry.add_with_capacity(1000);

        let mut dropped_at = None;
        for seq in 0..1000 {
            let report = channel.publish(&log_event("task_1_a", seq));
            if report.dropped.contains(&slow.id()) {
                dropped_at = Some(seq);
            }
        }

        // Ten frames fit; the eleventh overflows.
        assert_eq!(dropped_at, Some(10));
        assert!(!registry.contains(&slow.id()));
        assert!(slow.is_closed());

        let mut received = Vec::new();
        while let Ok(frame) = fast_rx.try_recv() {
            received.push(seq_of(&frame));
        }
        assert_eq!(received, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_closed_receiver_is_removed() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let channel = GlobalFanout::new(Arc::clone(&registry));
        let (conn, rx) = registry.add();
        drop(rx);

        let report = channel.publish(&log_event("task_1_a", 0));

        assert_eq!(report.delivered, 0);
        assert!(!registry.contains(&conn.id()));
    }

    #[tokio::test]
    async fn test_per_job_scope() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let channel = PerJobScoped::new(Arc::clone(&registry));
        let (watcher, mut watcher_rx) = registry.add();
        let (_other, mut other_rx) = registry.add();

        channel.subscribe(&watcher.id(), &"task_1_a".into()).unwrap();

        channel.publish(&log_event("task_1_a", 1));
        channel.publish(&log_event("task_1_b", 2));
        channel.publish(&JobEvent::Notice {
            content: "hello".into(),
        });

        assert_eq!(seq_of(&watcher_rx.recv().await.unwrap()), 1);
        assert!(watcher_rx.recv().await.unwrap().contains("notice"));
        assert!(watcher_rx.try_recv().is_err());

        assert!(other_rx.recv().await.unwrap().contains("notice"));
        assert!(other_rx.try_recv().is_err());

        channel.release(&"task_1_a".into());
        assert_eq!(channel.publish(&log_event("task_1_a", 3)).delivered, 0);
    }

    #[test]
    fn test_for_policy() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        assert_eq!(
            for_policy(BroadcastPolicy::Global, Arc::clone(&registry)).policy(),
            BroadcastPolicy::Global
        );
        assert_eq!(
            for_policy(BroadcastPolicy::PerJob, registry).policy(),
            BroadcastPolicy::PerJob
        );
    }

    #[test]
    fn test_no_delivery_after_remove_returns() {
        let registry = Arc::new(ConnectionRegistry::new(100_000));
        let channel = Arc::new(GlobalFanout::new(Arc::clone(&registry)));
        let (conn, mut rx) = registry.add();
        let published = Arc::new(AtomicUsize::new(0));

        let publisher = {
            let channel = Arc::clone(&channel);
            let published = Arc::clone(&published);
            std::thread::spawn(move || {
                for seq in 0..20_000 {
                    channel.publish(&log_event("task_1_a", seq));
                    published.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        std::thread::sleep(Duration::from_millis(2));
        registry.remove(&conn.id());
        let completed_at_removal = published.load(Ordering::SeqCst);
        publisher.join().unwrap();

        // The publish in flight at removal may land; anything started later must not.
        while let Ok(frame) = rx.try_recv() {
            assert!(seq_of(&frame) <= completed_at_removal);
        }
    }

    #[tokio::test]
    async fn test_events_per_job_keep_publish_order() {
        let registry = Arc::new(ConnectionRegistry::new(64));
        let channel = GlobalFanout::new(Arc::clone(&registry));
        let (_conn, mut rx) = registry.add();

        for seq in 0..10 {
            channel.publish(&log_event("task_1_a", seq));
            channel.publish(&log_event("task_1_b", seq));
        }

        let mut a = Vec::new();
        let mut b = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            let seq = value["output"].as_str().unwrap().parse::<usize>().unwrap();
            match value["research_id"].as_str().unwrap() {
                "task_1_a" => a.push(seq),
                _ => b.push(seq),
            }
        }
        assert_eq!(a, (0..10).collect::<Vec<_>>());
        assert_eq!(b, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_publishers_keep_per_job_order() {
        const EVENTS: usize = 5_000;
        let registry = Arc::new(ConnectionRegistry::new(2 * EVENTS));
        let channel = Arc::new(GlobalFanout::new(Arc::clone(&registry)));
        let (_conn, mut rx) = registry.add();

        let publishers: Vec<_> = ["task_1_a", "task_1_b"]
            .into_iter()
            .map(|job| {
                let channel = Arc::clone(&channel);
                std::thread::spawn(move || {
                    for seq in 0..EVENTS {
                        channel.publish(&log_event(job, seq));
                    }
                })
            })
            .collect();
        for publisher in publishers {
            publisher.join().unwrap();
        }

        let mut a = Vec::with_capacity(EVENTS);
        let mut b = Vec::with_capacity(EVENTS);
        while let Ok(frame) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            match value["research_id"].as_str().unwrap() {
                "task_1_a" => a.push(seq_of(&frame)),
                _ => b.push(seq_of(&frame)),
            }
        }
        assert_eq!(a, (0..EVENTS).collect::<Vec<_>>());
        assert_eq!(b, (0..EVENTS).collect::<Vec<_>>());
    }
}
