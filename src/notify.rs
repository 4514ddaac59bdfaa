use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

// Bounded so a stalled consumer exerts backpressure on nobody: the engine
// drops and logs instead of blocking the tick.
pub const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Execute,
    Fail,
    Revoke,
}

/// Kind-specific projection pushed to the owner's live channel. Ephemeral,
/// never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    MandateExecuted {
        mandate_id: Uuid,
        movement_id: Uuid,
        amount: Decimal,
        new_balance: Decimal,
    },
    MandateFailed {
        mandate_id: Uuid,
        reason: String,
    },
    TransferRevoked {
        movement_id: Uuid,
        compensating_movement_id: Uuid,
        amount: Decimal,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    #[serde(skip)]
    customer: Uuid,
    entity: &'static str,
    event: EventKind,
    payload: EventPayload,
    at: DateTime<Utc>,
}

impl Notification {
    pub fn mandate_executed(
        customer: Uuid,
        mandate_id: Uuid,
        movement_id: Uuid,
        amount: Decimal,
        new_balance: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            customer,
            entity: "mandate",
            event: EventKind::Execute,
            payload: EventPayload::MandateExecuted {
                mandate_id,
                movement_id,
                amount,
                new_balance,
            },
            at,
        }
    }

    pub fn mandate_failed(customer: Uuid, mandate_id: Uuid, reason: String, at: DateTime<Utc>) -> Self {
        Self {
            customer,
            entity: "mandate",
            event: EventKind::Fail,
            payload: EventPayload::MandateFailed { mandate_id, reason },
            at,
        }
    }

    pub fn transfer_revoked(
        customer: Uuid,
        movement_id: Uuid,
        compensating_movement_id: Uuid,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            customer,
            entity: "movement",
            event: EventKind::Revoke,
            payload: EventPayload::TransferRevoked {
                movement_id,
                compensating_movement_id,
                amount,
            },
            at,
        }
    }

    pub fn customer(&self) -> Uuid {
        self.customer
    }

    pub fn event(&self) -> EventKind {
        self.event
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }
}

/// Resolves the human recipient of a notification: customer record to owning
/// user, user to channel key (username).
pub trait CustomerDirectory: Send + Sync + 'static {
    fn owner_user(&self, customer: Uuid) -> Option<Uuid>;
    fn username(&self, user: Uuid) -> Option<String>;
}

/// Live-channel registry collaborator. Fire-and-forget: implementations may
/// no-op when the user has no open channel.
pub trait ChannelRegistry: Send + Sync + 'static {
    fn send_to_user(&self, username: &str, event: &str);
}

#[derive(Default)]
pub struct InMemoryDirectory {
    owners: HashMap<Uuid, Uuid>,
    usernames: HashMap<Uuid, String>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, customer: Uuid, user: Uuid, username: impl Into<String>) {
        self.owners.insert(customer, user);
        self.usernames.insert(user, username.into());
    }
}

impl CustomerDirectory for InMemoryDirectory {
    fn owner_user(&self, customer: Uuid) -> Option<Uuid> {
        self.owners.get(&customer).copied()
    }

    fn username(&self, user: Uuid) -> Option<String> {
        self.usernames.get(&user).cloned()
    }
}

/// Registry stand-in that writes deliveries to the log. Used by the demo
/// binary; the real transport lives outside this crate.
pub struct LogChannelRegistry;

impl ChannelRegistry for LogChannelRegistry {
    fn send_to_user(&self, username: &str, event: &str) {
        info!("channel[{username}] <- {event}");
    }
}

// Queue messages: events, plus the dispatcher's own stop marker. The marker
// travels the queue so shutdown drains everything published before it even
// while sender clones are still alive in the engine.
enum Envelope {
    Event(Notification),
    Shutdown,
}

/// Cloneable producer half handed to the engine and the revocation service.
#[derive(Clone)]
pub struct NotificationSender {
    tx: SyncSender<Envelope>,
}

impl NotificationSender {
    /// Non-blocking publish. A full queue or a stopped worker costs the event,
    /// not the tick; failures are logged and never retried here.
    pub fn publish(&self, notification: Notification) {
        match self.tx.try_send(Envelope::Event(notification)) {
            Ok(()) => {}
            Err(TrySendError::Full(Envelope::Event(n))) => {
                warn!(
                    "Notification queue full, dropping {:?} event for customer {}",
                    n.event(),
                    n.customer()
                );
            }
            Err(TrySendError::Disconnected(Envelope::Event(n))) => {
                error!(
                    "Notification worker gone, dropping {:?} event for customer {}",
                    n.event(),
                    n.customer()
                );
            }
            Err(_) => {}
        }
    }
}

#[cfg(test)]
impl NotificationSender {
    /// Sender wired to a bare receiver, for asserting on published events
    /// without a worker thread.
    pub fn test_pair() -> (Self, TestQueue) {
        let (tx, rx) = mpsc::sync_channel(QUEUE_CAPACITY);
        (Self { tx }, TestQueue(rx))
    }
}

/// Receiver end for unit tests; yields only the published events.
#[cfg(test)]
pub struct TestQueue(Receiver<Envelope>);

#[cfg(test)]
impl TestQueue {
    pub fn try_recv(&self) -> Option<Notification> {
        match self.0.try_recv() {
            Ok(Envelope::Event(n)) => Some(n),
            _ => None,
        }
    }
}

/// Owns the delivery worker. The engine publishes onto the bounded queue; the
/// worker resolves the recipient and hands the serialized event to the channel
/// registry, off the tick's critical path.
pub struct NotificationDispatcher {
    tx: SyncSender<Envelope>,
    worker: JoinHandle<()>,
}

impl NotificationDispatcher {
    pub fn spawn(
        directory: Arc<dyn CustomerDirectory>,
        registry: Arc<dyn ChannelRegistry>,
    ) -> Self {
        let (tx, rx) = mpsc::sync_channel(QUEUE_CAPACITY);
        let worker = thread::spawn(move || delivery_loop(rx, directory, registry));
        Self { tx, worker }
    }

    pub fn sender(&self) -> NotificationSender {
        NotificationSender {
            tx: self.tx.clone(),
        }
    }

    /// Queues the stop marker and waits for the worker to drain everything
    /// published before it.
    pub fn shutdown(self) {
        // Blocking send: shutdown may wait for the queue, the tick never does.
        let _ = self.tx.send(Envelope::Shutdown);
        drop(self.tx);
        if self.worker.join().is_err() {
            error!("Notification worker panicked");
        }
    }
}

// Runs until the stop marker arrives or every sender is gone.
fn delivery_loop(
    rx: Receiver<Envelope>,
    directory: Arc<dyn CustomerDirectory>,
    registry: Arc<dyn ChannelRegistry>,
) {
    while let Ok(envelope) = rx.recv() {
        match envelope {
            Envelope::Event(notification) => {
                deliver(&notification, directory.as_ref(), registry.as_ref());
            }
            Envelope::Shutdown => break,
        }
    }
}

fn deliver(
    notification: &Notification,
    directory: &dyn CustomerDirectory,
    registry: &dyn ChannelRegistry,
) {
    let customer = notification.customer();
    let Some(user) = directory.owner_user(customer) else {
        // Data inconsistency: every customer should resolve to an owner.
        warn!("No owning user for customer {customer}, dropping notification");
        return;
    };
    let Some(username) = directory.username(user) else {
        debug!("User {user} has no channel key, dropping notification");
        return;
    };
    match serde_json::to_string(notification) {
        Ok(event) => registry.send_to_user(&username, &event),
        Err(e) => error!("Failed to serialize notification for {username}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct RecordingRegistry {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl ChannelRegistry for RecordingRegistry {
        fn send_to_user(&self, username: &str, event: &str) {
            self.sent
                .lock()
                .unwrap()
                .push((username.to_string(), event.to_string()));
        }
    }

    #[test]
    fn delivers_serialized_event_to_resolved_username() {
        let customer = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut directory = InMemoryDirectory::new();
        directory.register(customer, user, "mgarcia");
        let registry = RecordingRegistry {
            sent: Mutex::new(Vec::new()),
        };

        let notification = Notification::mandate_executed(
            customer,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Decimal::new(10_000, 2),
            Decimal::ZERO,
            Utc::now(),
        );
        deliver(&notification, &directory, &registry);

        let sent = registry.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "mgarcia");
        assert!(sent[0].1.contains("\"event\":\"EXECUTE\""));
        assert!(sent[0].1.contains("\"entity\":\"mandate\""));
    }

    #[test]
    fn offline_user_is_not_an_error() {
        let registry = RecordingRegistry {
            sent: Mutex::new(Vec::new()),
        };
        let directory = InMemoryDirectory::new(); // resolves nobody

        let notification = Notification::mandate_failed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "storage offline".to_string(),
            Utc::now(),
        );
        deliver(&notification, &directory, &registry);

        assert!(registry.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn worker_drains_queue_before_shutdown() {
        let customer = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut directory = InMemoryDirectory::new();
        directory.register(customer, user, "jlopez");
        let registry = Arc::new(RecordingRegistry {
            sent: Mutex::new(Vec::new()),
        });

        let dispatcher = NotificationDispatcher::spawn(Arc::new(directory), registry.clone());
        let sender = dispatcher.sender();
        for _ in 0..5 {
            sender.publish(Notification::transfer_revoked(
                customer,
                Uuid::new_v4(),
                Uuid::new_v4(),
                Decimal::new(5_000, 2),
                Utc::now(),
            ));
        }
        drop(sender);
        dispatcher.shutdown();

        assert_eq!(registry.sent.lock().unwrap().len(), 5);
    }
}
