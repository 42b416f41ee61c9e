//! In-process notification bus
//!
//! Carries user-facing notifications from the notifier bridge to whatever
//! delivery layer (socket server, SSE endpoint) is wired on top. Delivery is
//! ephemeral and best-effort: nothing is persisted, a subscriber that is not
//! connected when an event fires simply never sees it, and a slow subscriber
//! loses the oldest buffered events rather than stalling the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

/// Default buffered capacity per subscriber
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// What a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// A single employee record was created
    Created,
    /// A single employee creation permanently failed
    CreationFailed,
    /// A bulk import finished successfully
    ImportSucceeded,
    /// A bulk import permanently failed
    ImportFailed,
    /// A bulk import reported new progress
    ImportProgress,
}

/// A user-facing notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Human-readable message ready for display
    pub message: String,
    /// Structured payload for clients that render their own UI
    pub data: Option<Value>,
}

/// Who a notification is addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every connected subscriber
    Broadcast,
    /// Only subscribers registered for this owner id
    Owner(String),
}

#[derive(Debug, Clone)]
struct Envelope {
    scope: Scope,
    notification: Notification,
}

/// Handle for publishing and subscribing to notifications.
///
/// Cheap to clone; every clone publishes into the same channel. Constructed
/// once at startup and passed to whoever needs it, so there is no global
/// registry and no initialization ordering to get wrong.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<Envelope>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Send a notification to every subscriber
    pub fn broadcast(&self, notification: Notification) {
        let _ = self.tx.send(Envelope {
            scope: Scope::Broadcast,
            notification,
        });
    }

    /// Send a notification to subscribers registered for one owner
    pub fn emit_to_owner(&self, owner_id: &str, notification: Notification) {
        let _ = self.tx.send(Envelope {
            scope: Scope::Owner(owner_id.to_string()),
            notification,
        });
    }

    /// Subscribe to every notification, broadcast and owner-scoped alike
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            owner: None,
        }
    }

    /// Subscribe as one owner: receives broadcasts plus notifications
    /// addressed to that owner
    pub fn subscribe_owner(&self, owner_id: &str) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            owner: Some(owner_id.to_string()),
        }
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// A filtered receiver on the notification bus
pub struct Subscription {
    rx: broadcast::Receiver<Envelope>,
    owner: Option<String>,
}

impl Subscription {
    /// Next notification addressed to this subscription, or `None` once the
    /// bus is gone. Lagging drops the oldest buffered notifications and
    /// keeps receiving.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if self.matches(&envelope.scope) => {
                    return Some(envelope.notification);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Self::recv`]; `None` when nothing is
    /// currently buffered
    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) if self.matches(&envelope.scope) => {
                    return Some(envelope.notification);
                }
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }

    fn matches(&self, scope: &Scope) -> bool {
        match (&self.owner, scope) {
            (None, _) => true,
            (Some(_), Scope::Broadcast) => true,
            (Some(mine), Scope::Owner(target)) => mine == target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(kind: NotificationKind, message: &str) -> Notification {
        Notification {
            kind,
            message: message.to_string(),
            data: None,
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber() {
        let bus = NotificationBus::new(8);
        let mut a = bus.subscribe_owner("user-a");
        let mut b = bus.subscribe_owner("user-b");

        bus.broadcast(notification(NotificationKind::ImportSucceeded, "done"));

        assert_eq!(a.recv().await.unwrap().message, "done");
        assert_eq!(b.recv().await.unwrap().message, "done");
    }

    #[tokio::test]
    async fn test_owner_scope_filters_other_owners() {
        let bus = NotificationBus::new(8);
        let mut a = bus.subscribe_owner("user-a");
        let mut b = bus.subscribe_owner("user-b");

        bus.emit_to_owner("user-a", notification(NotificationKind::Created, "for a"));
        bus.broadcast(notification(NotificationKind::ImportProgress, "for all"));

        // a sees both, b only the broadcast.
        assert_eq!(a.recv().await.unwrap().message, "for a");
        assert_eq!(a.recv().await.unwrap().message, "for all");
        assert_eq!(b.recv().await.unwrap().message, "for all");
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_firehose_subscription_sees_owner_scoped_events() {
        let bus = NotificationBus::new(8);
        let mut all = bus.subscribe();

        bus.emit_to_owner("user-a", notification(NotificationKind::Created, "scoped"));

        assert_eq!(all.recv().await.unwrap().message, "scoped");
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let bus = NotificationBus::new(8);
        bus.broadcast(notification(NotificationKind::ImportFailed, "nobody listens"));
        bus.emit_to_owner("ghost", notification(NotificationKind::Created, "nobody"));
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let bus = NotificationBus::new(8);
        let mut sub = bus.subscribe();
        assert!(sub.try_recv().is_none());
    }
}
