//! Realtime subscriptions broker.
//!
//! Tracks connected realtime clients and the topics each one subscribed to.
//! Registering a client under an id that is already taken discards the
//! previous client (takeover).

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

/// Message delivered to subscribed clients.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Topic the message was published on.
    pub name: String,
    pub data: Value,
}

/// A connected realtime client.
#[derive(Debug)]
pub struct Client {
    id: String,
    subscriptions: RwLock<HashSet<String>>,
    sender: Sender<Message>,
    discarded: AtomicBool,
}

impl Client {
    /// Create a client and the receiving half of its message channel.
    ///
    /// # Arguments
    ///
    /// * `id` - Unique client id
    /// * `capacity` - Maximum number of undelivered messages.
    ///   Messages are dropped for this client if it falls behind.
    pub fn new(id: impl Into<String>, capacity: usize) -> (Arc<Self>, Receiver<Message>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let client = Arc::new(Self {
            id: id.into(),
            subscriptions: RwLock::new(HashSet::new()),
            sender,
            discarded: AtomicBool::new(false),
        });
        (client, receiver)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subscribe(&self, topics: impl IntoIterator<Item = impl Into<String>>) {
        let mut subscriptions = self.subscriptions.write();
        subscriptions.extend(topics.into_iter().map(Into::into));
    }

    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.subscriptions.write().remove(topic)
    }

    pub fn has_subscription(&self, topic: &str) -> bool {
        self.subscriptions.read().contains(topic)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscriptions.read().iter().cloned().collect();
        topics.sort();
        topics
    }

    /// Whether the client was replaced or unregistered.
    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::SeqCst)
    }

    fn discard(&self) {
        self.discarded.store(true, Ordering::SeqCst);
    }

    /// Queue a message without waiting. Returns false if it was dropped.
    pub fn send(&self, message: Message) -> bool {
        if self.is_discarded() {
            return false;
        }
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(client_id = %self.id, "Realtime client lagging, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Registry of realtime clients.
#[derive(Debug, Default)]
pub struct SubscriptionsBroker {
    clients: RwLock<HashMap<String, Arc<Client>>>,
}

impl SubscriptionsBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client, discarding any previous client with the same id.
    pub fn register(&self, client: Arc<Client>) {
        let previous = self.clients.write().insert(client.id.clone(), client);
        if let Some(old) = previous {
            tracing::info!(client_id = %old.id, "Replacing prior realtime client (takeover)");
            old.discard();
        }
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<Client>> {
        let removed = self.clients.write().remove(id);
        if let Some(client) = &removed {
            client.discard();
        }
        removed
    }

    pub fn client(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.read().get(id).cloned()
    }

    pub fn total_clients(&self) -> usize {
        self.clients.read().len()
    }

    /// Deliver `data` on `topic` to every subscribed client.
    ///
    /// Returns the number of clients the message was queued for.
    pub fn broadcast(&self, topic: &str, data: Value) -> usize {
        let targets: Vec<Arc<Client>> = self
            .clients
            .read()
            .values()
            .filter(|client| client.has_subscription(topic))
            .cloned()
            .collect();

        targets
            .iter()
            .filter(|client| {
                client.send(Message {
                    name: topic.to_string(),
                    data: data.clone(),
                })
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers_only() {
        let broker = SubscriptionsBroker::new();
        let (a, mut rx_a) = Client::new("a", 8);
        let (b, mut rx_b) = Client::new("b", 8);
        a.subscribe(["settings"]);
        broker.register(a);
        broker.register(b);

        assert_eq!(broker.broadcast("settings", json!({"changed": true})), 1);

        let message = rx_a.recv().await.unwrap();
        assert_eq!(message.name, "settings");
        assert_eq!(message.data, json!({"changed": true}));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_takeover_discards_prior_client() {
        let broker = SubscriptionsBroker::new();
        let (first, _rx1) = Client::new("same", 1);
        let (second, _rx2) = Client::new("same", 1);

        broker.register(first.clone());
        broker.register(second);

        assert!(first.is_discarded());
        assert_eq!(broker.total_clients(), 1);
        assert!(!broker.client("same").unwrap().is_discarded());
    }

    #[test]
    fn test_lagging_client_drops_messages() {
        let broker = SubscriptionsBroker::new();
        let (client, _rx) = Client::new("slow", 1);
        client.subscribe(["logs"]);
        broker.register(client);

        assert_eq!(broker.broadcast("logs", json!(1)), 1);
        assert_eq!(broker.broadcast("logs", json!(2)), 0);
    }

    #[test]
    fn test_unregister() {
        let broker = SubscriptionsBroker::new();
        let (client, _rx) = Client::new("gone", 1);
        broker.register(client.clone());

        assert!(broker.unregister("gone").is_some());
        assert!(client.is_discarded());
        assert_eq!(broker.total_clients(), 0);
    }
}
