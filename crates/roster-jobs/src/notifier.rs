//! Bridge from queue lifecycle events to user-facing notifications
//!
//! The single place where job outcomes turn into messages people see.
//! Import events fan out to everyone; creation events are addressed to the
//! account that requested the creation.

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::notify::{Notification, NotificationBus, NotificationKind};
use crate::queue::{JobProgress, QueueEvent, QueueEventKind, QueueEvents, EMPLOYEE_QUEUE, IMPORT_QUEUE};

/// Translates queue lifecycle events into notifications
pub struct Notifier {
    bus: NotificationBus,
}

impl Notifier {
    pub fn new(bus: NotificationBus) -> Self {
        Self { bus }
    }

    /// Spawn the bridge loop. Runs until shutdown flips or the event
    /// channel closes.
    pub fn spawn(self, events: &QueueEvents, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    event = rx.recv() => match event {
                        Ok(event) => self.handle_event(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Notifier lagged behind queue events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!("Notifier stopped");
        })
    }

    fn handle_event(&self, event: QueueEvent) {
        match event.queue_name.as_str() {
            IMPORT_QUEUE => self.handle_import_event(event),
            EMPLOYEE_QUEUE => self.handle_create_event(event),
            other => debug!(queue = other, "Ignoring event from unhandled queue"),
        }
    }

    fn handle_import_event(&self, event: QueueEvent) {
        match event.kind {
            QueueEventKind::Progress(value) => {
                let message = match serde_json::from_value::<JobProgress>(value.clone()) {
                    Ok(progress) => format!("Imported {} rows", progress.count),
                    Err(_) => "Import in progress".to_string(),
                };
                self.bus.broadcast(Notification {
                    kind: NotificationKind::ImportProgress,
                    message,
                    data: Some(value),
                });
            }
            QueueEventKind::Completed(return_value) => {
                let count = return_value
                    .get("count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                self.bus.broadcast(Notification {
                    kind: NotificationKind::ImportSucceeded,
                    message: format!(
                        "Import complete! {} employees added to the database.",
                        format_count(count)
                    ),
                    data: Some(return_value),
                });
            }
            QueueEventKind::Failed(error) => {
                self.bus.broadcast(Notification {
                    kind: NotificationKind::ImportFailed,
                    message: format!("Import failed: {error}"),
                    data: None,
                });
            }
        }
    }

    fn handle_create_event(&self, event: QueueEvent) {
        let Some(owner_id) = event
            .payload
            .get("owner_id")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            // Nobody to address the outcome to; the job itself already ran.
            warn!(job_id = %event.job_id, "Creation event has no owner, dropping notification");
            return;
        };

        match event.kind {
            QueueEventKind::Completed(employee) => {
                let name = employee
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("employee")
                    .to_string();
                self.bus.emit_to_owner(
                    &owner_id,
                    Notification {
                        kind: NotificationKind::Created,
                        message: format!("Employee {name} has been successfully added."),
                        data: Some(employee),
                    },
                );
            }
            QueueEventKind::Failed(error) => {
                let name = event
                    .payload
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("employee");
                self.bus.emit_to_owner(
                    &owner_id,
                    Notification {
                        kind: NotificationKind::CreationFailed,
                        message: format!("Failed to create employee {name}: {error}"),
                        data: None,
                    },
                );
            }
            QueueEventKind::Progress(_) => {}
        }
    }
}

/// Thousands-separated rendering for user-facing counts: 19998 -> "19,998"
fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn event(queue: &str, payload: Value, kind: QueueEventKind) -> QueueEvent {
        QueueEvent {
            job_id: Uuid::new_v4(),
            queue_name: queue.to_string(),
            job_type: String::new(),
            payload,
            kind,
        }
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1,000");
        assert_eq!(format_count(19_998), "19,998");
        assert_eq!(format_count(1_234_567), "1,234,567");
    }

    #[test]
    fn test_import_success_broadcasts_formatted_count() {
        let bus = NotificationBus::new(8);
        let mut sub = bus.subscribe();
        let notifier = Notifier::new(bus);

        notifier.handle_event(event(
            IMPORT_QUEUE,
            json!({"owner_id": "user-1"}),
            QueueEventKind::Completed(json!({"count": 19998})),
        ));

        let notification = sub.try_recv().unwrap();
        assert_eq!(notification.kind, NotificationKind::ImportSucceeded);
        assert_eq!(
            notification.message,
            "Import complete! 19,998 employees added to the database."
        );
        assert_eq!(notification.data.unwrap()["count"], 19998);
    }

    #[test]
    fn test_import_progress_broadcasts_count_message() {
        let bus = NotificationBus::new(8);
        let mut sub = bus.subscribe();
        let notifier = Notifier::new(bus);

        notifier.handle_event(event(
            IMPORT_QUEUE,
            json!({"owner_id": "user-1"}),
            QueueEventKind::Progress(json!({"percentage": 25, "count": 5000})),
        ));

        let notification = sub.try_recv().unwrap();
        assert_eq!(notification.kind, NotificationKind::ImportProgress);
        assert_eq!(notification.message, "Imported 5000 rows");
        assert_eq!(notification.data.unwrap()["percentage"], 25);
    }

    #[test]
    fn test_import_failure_broadcasts_error() {
        let bus = NotificationBus::new(8);
        let mut sub = bus.subscribe();
        let notifier = Notifier::new(bus);

        notifier.handle_event(event(
            IMPORT_QUEUE,
            json!({"owner_id": "user-1"}),
            QueueEventKind::Failed("Source file unavailable: gone.csv".to_string()),
        ));

        let notification = sub.try_recv().unwrap();
        assert_eq!(notification.kind, NotificationKind::ImportFailed);
        assert_eq!(
            notification.message,
            "Import failed: Source file unavailable: gone.csv"
        );
    }

    #[test]
    fn test_creation_success_is_owner_scoped() {
        let bus = NotificationBus::new(8);
        let mut owner = bus.subscribe_owner("user-1");
        let mut other = bus.subscribe_owner("user-2");
        let notifier = Notifier::new(bus);

        notifier.handle_event(event(
            EMPLOYEE_QUEUE,
            json!({"owner_id": "user-1", "name": "Ada"}),
            QueueEventKind::Completed(json!({"id": Uuid::new_v4(), "name": "Ada"})),
        ));

        let notification = owner.try_recv().unwrap();
        assert_eq!(notification.kind, NotificationKind::Created);
        assert_eq!(notification.message, "Employee Ada has been successfully added.");
        assert!(other.try_recv().is_none());
    }

    #[test]
    fn test_creation_failure_names_the_employee() {
        let bus = NotificationBus::new(8);
        let mut owner = bus.subscribe_owner("user-1");
        let notifier = Notifier::new(bus);

        notifier.handle_event(event(
            EMPLOYEE_QUEUE,
            json!({"owner_id": "user-1", "name": "Ada"}),
            QueueEventKind::Failed("record store unavailable".to_string()),
        ));

        let notification = owner.try_recv().unwrap();
        assert_eq!(notification.kind, NotificationKind::CreationFailed);
        assert_eq!(
            notification.message,
            "Failed to create employee Ada: record store unavailable"
        );
    }

    #[test]
    fn test_creation_event_without_owner_is_dropped() {
        let bus = NotificationBus::new(8);
        let mut all = bus.subscribe();
        let notifier = Notifier::new(bus);

        notifier.handle_event(event(
            EMPLOYEE_QUEUE,
            json!({"name": "Ada"}),
            QueueEventKind::Completed(json!({"name": "Ada"})),
        ));

        assert!(all.try_recv().is_none());
    }
}
