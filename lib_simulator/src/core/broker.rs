//! # In-Process PubSub Broker
//!
//! The broker is the fanout hub between the operation server and the realtime
//! subscription server. A successful mutation publishes one event under the
//! mutated root field's topic; the broker pushes that event to every live
//! subscriber registered under the topic whose argument predicate matches the
//! payload.
//!
//! ## Design notes
//!
//! - The topic map is guarded by a `std::sync::Mutex` and every mutation
//!   completes while the lock is held, with no await point in the middle, so
//!   registry updates are atomic with respect to task scheduling.
//! - `publish` takes a snapshot of the subscriber list under the lock and
//!   iterates the snapshot afterwards. A subscriber removed by a concurrent
//!   disconnect cannot corrupt the iteration; its delivery simply fails on the
//!   dropped channel and is logged.
//! - There is no persistence or replay. A subscription registered after an
//!   event was published never sees that event.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;

/// Process-unique identifier for a realtime connection.
pub type ConnectionId = usize;

/// One matched event on its way to a connection's socket task.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The client-chosen id of the subscription that matched.
    pub subscription_id: String,
    /// The resolved mutation payload.
    pub payload: Value,
}

/// Equality matcher over a subscription's declared root-field arguments.
///
/// An event payload matches when every declared argument equals the
/// correspondingly named top-level field of the payload. An argument whose
/// field is absent from the payload does not match. Richer filter languages
/// would slot in here as new constructors.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    fields: serde_json::Map<String, Value>,
}

impl Predicate {
    pub fn equals(fields: serde_json::Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn matches(&self, payload: &Value) -> bool {
        self.fields
            .iter()
            .all(|(name, expected)| payload.get(name.as_str()) == Some(expected))
    }
}

/// A registered subscription reference: who owns it and how to reach it.
struct Subscriber {
    connection_id: ConnectionId,
    subscription_id: String,
    predicate: Predicate,
    sender: mpsc::UnboundedSender<Delivery>,
}

/// Topic-keyed registry mapping a root field to its live subscribers.
///
/// Owned by the coordinator and shared by reference with the operation server
/// (publish side) and the realtime server (registration side).
pub struct SubscriptionBroker {
    topics: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl SubscriptionBroker {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Register a subscription under a topic.
    ///
    /// The same `(connection, subscription)` pair may be registered under
    /// several topics when its root field is triggered by several mutations.
    pub fn subscribe(
        &self,
        topic: &str,
        connection_id: ConnectionId,
        subscription_id: &str,
        predicate: Predicate,
        sender: mpsc::UnboundedSender<Delivery>,
    ) {
        let mut topics = self.topics.lock().expect("Broker lock poisoned");
        topics.entry(topic.to_string()).or_default().push(Subscriber {
            connection_id,
            subscription_id: subscription_id.to_string(),
            predicate,
            sender,
        });
        log::debug!(
            "Subscription '{}' on connection {} registered under topic '{}'",
            subscription_id,
            connection_id,
            topic
        );
    }

    /// Remove one subscription from every topic it is registered under.
    /// A no-op for unknown ids, tolerating races with connection teardown.
    pub fn unsubscribe(&self, connection_id: ConnectionId, subscription_id: &str) {
        let mut topics = self.topics.lock().expect("Broker lock poisoned");
        for subscribers in topics.values_mut() {
            subscribers.retain(|s| {
                !(s.connection_id == connection_id && s.subscription_id == subscription_id)
            });
        }
        topics.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Remove every subscription owned by a connection in one step, so a
    /// publish interleaved with a disconnect never sees a half-closed
    /// connection.
    pub fn remove_connection(&self, connection_id: ConnectionId) {
        let mut topics = self.topics.lock().expect("Broker lock poisoned");
        for subscribers in topics.values_mut() {
            subscribers.retain(|s| s.connection_id != connection_id);
        }
        topics.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Deliver an event to every currently-registered subscriber of `topic`
    /// whose predicate matches `payload`. Returns how many deliveries were
    /// handed to connection queues.
    ///
    /// A failed send means the receiving connection task is already gone; it
    /// is logged and never aborts delivery to the remaining subscribers.
    pub fn publish(&self, topic: &str, payload: &Value) -> usize {
        // Snapshot under the lock, deliver outside it.
        let snapshot: Vec<(String, mpsc::UnboundedSender<Delivery>)> = {
            let topics = self.topics.lock().expect("Broker lock poisoned");
            match topics.get(topic) {
                Some(subscribers) => subscribers
                    .iter()
                    .filter(|s| s.predicate.matches(payload))
                    .map(|s| (s.subscription_id.clone(), s.sender.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut delivered = 0;
        for (subscription_id, sender) in snapshot {
            let delivery = Delivery {
                subscription_id: subscription_id.clone(),
                payload: payload.clone(),
            };
            match sender.send(delivery) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    log::warn!(
                        "Delivery to subscription '{}' failed: connection closed mid-publish",
                        subscription_id
                    );
                }
            }
        }
        log::debug!("Published event on topic '{}' to {} subscriber(s)", topic, delivered);
        delivered
    }

    /// Number of registrations currently held for a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().expect("Broker lock poisoned");
        topics.get(topic).map_or(0, Vec::len)
    }
}

impl Default for SubscriptionBroker {
    fn default() -> Self {
        Self::new()
    }
}
