//! Queue lifecycle event channel
//!
//! Every terminal transition and progress update publishes an event here.
//! Subscribers are ephemeral: events are fan-out only, never persisted, and
//! publishing succeeds whether or not anyone is listening.

use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default buffered capacity of the lifecycle channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What happened to a job
#[derive(Debug, Clone)]
pub enum QueueEventKind {
    /// A worker reported a new progress value
    Progress(Value),
    /// The job completed; carries the handler's return value
    Completed(Value),
    /// The job dead-lettered after exhausting its retry budget
    Failed(String),
}

/// A single queue lifecycle event
#[derive(Debug, Clone)]
pub struct QueueEvent {
    pub job_id: Uuid,
    pub queue_name: String,
    pub job_type: String,
    /// Payload snapshot taken when the job was leased; carries routing
    /// fields such as the owner id
    pub payload: Value,
    pub kind: QueueEventKind,
}

/// Publish/subscribe handle for queue lifecycle events
#[derive(Debug, Clone)]
pub struct QueueEvents {
    tx: broadcast::Sender<QueueEvent>,
}

impl QueueEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Dropped silently when nobody is subscribed.
    pub(crate) fn publish(&self, event: QueueEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for QueueEvents {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event(kind: QueueEventKind) -> QueueEvent {
        QueueEvent {
            job_id: Uuid::new_v4(),
            queue_name: "import-queue".to_string(),
            job_type: "import-employees".to_string(),
            payload: json!({"owner_id": "user-1"}),
            kind,
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let events = QueueEvents::new(8);
        let mut rx = events.subscribe();

        events.publish(sample_event(QueueEventKind::Completed(json!({"count": 3}))));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.queue_name, "import-queue");
        match event.kind {
            QueueEventKind::Completed(value) => assert_eq!(value["count"], 3),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let events = QueueEvents::new(8);
        // No receiver exists; this must not panic or error.
        events.publish(sample_event(QueueEventKind::Failed("boom".to_string())));
    }

    #[tokio::test]
    async fn test_all_subscribers_see_every_event() {
        let events = QueueEvents::new(8);
        let mut a = events.subscribe();
        let mut b = events.subscribe();

        events.publish(sample_event(QueueEventKind::Progress(json!({"percentage": 50}))));

        assert!(matches!(a.recv().await.unwrap().kind, QueueEventKind::Progress(_)));
        assert!(matches!(b.recv().await.unwrap().kind, QueueEventKind::Progress(_)));
    }
}
