//! In-process development broker.
//!
//! A set of in-memory queues keyed by name. Subscriptions are topic
//! patterns with `*` (one level) and `>` (multi-level suffix). Publishing
//! matches the topic against every subscription and deep-copies the
//! message into each matching queue, so consumers never alias payloads.
//!
//! All dev connections created for the same broker URL resolve to one
//! shared [`DevBrokerState`] through the process-wide [`DevBrokerHub`];
//! without that, an input component and an output component (each owning
//! its own connection) could never see each other's messages.

// Layer 1: Standard library imports
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};

// Layer 3: Internal module imports
use super::config::Subscription;
use super::error::BrokerError;
use super::status::{ConnectionMonitor, ConnectionStatus};
use super::traits::{Broker, DeliveryTag, InboundMessage, PublishReceipt, QueueDurability};
use crate::message::NackOutcome;

/// Compile a `*`/`>` topic pattern to an anchored regex.
///
/// `*` matches exactly one topic level (`[^/]+`), `>` matches any suffix
/// (`.*`). Everything else is literal.
#[allow(clippy::unwrap_used)] // escaped input cannot produce an invalid pattern
pub fn compile_subscription(pattern: &str) -> Regex {
    let escaped = regex::escape(pattern);
    let translated = escaped.replace("\\*", "[^/]+").replace(">", ".*");
    let anchored = format!("^{translated}$");
    Regex::new(&anchored).unwrap()
}

struct StoredMessage {
    payload: Vec<u8>,
    topic: String,
    user_properties: Map<String, Value>,
}

struct DevQueue {
    tx: mpsc::UnboundedSender<StoredMessage>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<StoredMessage>>,
}

impl DevQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}

/// Queue and subscription state shared by every dev connection to the
/// same URL.
#[derive(Default)]
pub struct DevBrokerState {
    queues: DashMap<String, Arc<DevQueue>>,
    // (pattern, compiled, queue) triples; a single lock guards the table.
    subscriptions: Mutex<Vec<(String, Regex, String)>>,
}

impl DevBrokerState {
    fn ensure_queue(&self, name: &str) -> Arc<DevQueue> {
        Arc::clone(
            &self
                .queues
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(DevQueue::new())),
        )
    }

    fn subscribe(&self, pattern: &str, queue: &str) {
        self.ensure_queue(queue);
        let mut table = self.subscriptions.lock();
        table.push((pattern.to_string(), compile_subscription(pattern), queue.to_string()));
    }

    fn matching_queues(&self, topic: &str) -> BTreeSet<String> {
        let table = self.subscriptions.lock();
        table
            .iter()
            .filter(|(_, regex, _)| regex.is_match(topic))
            .map(|(_, _, queue)| queue.clone())
            .collect()
    }
}

/// Process-wide registry of dev broker states, keyed by broker URL.
#[derive(Default)]
pub struct DevBrokerHub {
    states: DashMap<String, Arc<DevBrokerState>>,
}

impl DevBrokerHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// State shared by every connection to `url`.
    pub fn state_for(&self, url: &str) -> Arc<DevBrokerState> {
        Arc::clone(
            &self
                .states
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(DevBrokerState::default())),
        )
    }
}

/// One dev connection. Cheap; all the weight lives in the shared state.
pub struct DevBroker {
    state: Arc<DevBrokerState>,
    connected: AtomicBool,
    monitor: ConnectionMonitor,
}

impl DevBroker {
    pub fn new(state: Arc<DevBrokerState>) -> Self {
        Self {
            state,
            connected: AtomicBool::new(false),
            monitor: ConnectionMonitor::new(),
        }
    }

    fn check_connected(&self) -> Result<(), BrokerError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }
}

#[async_trait]
impl Broker for DevBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.connected.store(true, Ordering::SeqCst);
        self.monitor.set(ConnectionStatus::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        self.monitor.set(ConnectionStatus::Disconnected);
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        subscriptions: &[Subscription],
        _durability: QueueDurability,
    ) -> Result<(), BrokerError> {
        self.check_connected()?;
        self.state.ensure_queue(queue);
        for subscription in subscriptions {
            self.state.subscribe(&subscription.topic, queue);
        }
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<InboundMessage>, BrokerError> {
        self.check_connected()?;
        let queue = self
            .state
            .queues
            .get(queue)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;

        let message = {
            let mut rx = queue.rx.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) | Err(_) => return Ok(None),
            }
        };

        Ok(Some(InboundMessage {
            payload: message.payload,
            topic: message.topic,
            user_properties: message.user_properties,
            delivery: None,
        }))
    }

    async fn send(
        &self,
        topic: &str,
        payload: Vec<u8>,
        user_properties: &Map<String, Value>,
        receipt: Option<PublishReceipt>,
    ) -> Result<(), BrokerError> {
        self.check_connected()?;
        let targets = self.state.matching_queues(topic);
        for name in &targets {
            if let Some(queue) = self.state.queues.get(name) {
                let copy = StoredMessage {
                    payload: payload.clone(),
                    topic: topic.to_string(),
                    user_properties: user_properties.clone(),
                };
                let _ = queue.tx.send(copy);
            }
        }
        tracing::trace!(topic, queues = targets.len(), "Dev broker publish");
        if let Some(receipt) = receipt {
            receipt(Ok(()));
        }
        Ok(())
    }

    async fn ack(&self, _delivery: DeliveryTag) -> Result<(), BrokerError> {
        // The dev broker settles on receive; nothing to confirm.
        Ok(())
    }

    async fn nack(&self, _delivery: DeliveryTag, outcome: NackOutcome) -> Result<(), BrokerError> {
        tracing::debug!(%outcome, "Dev broker nack (dropped)");
        Ok(())
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.monitor.get()
    }

    fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.monitor.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn broker() -> DevBroker {
        let hub = DevBrokerHub::new();
        DevBroker::new(hub.state_for("dev://test"))
    }

    #[test]
    fn wildcard_compilation() {
        let single = compile_subscription("a/*/c");
        assert!(single.is_match("a/b/c"));
        assert!(!single.is_match("a/b/c/d"));
        assert!(!single.is_match("a//c"));

        let suffix = compile_subscription("a/>");
        assert!(suffix.is_match("a/anything/more"));
        assert!(!suffix.is_match("a"));

        let literal = compile_subscription("exact/topic");
        assert!(literal.is_match("exact/topic"));
        assert!(!literal.is_match("exact/topic/extra"));
    }

    #[tokio::test]
    async fn publish_reaches_matching_queues_once() {
        let broker = broker();
        broker.connect().await.unwrap();
        broker
            .bind_queue(
                "q1",
                &[Subscription::new("a/*"), Subscription::new("b/>")],
                QueueDurability::Temporary,
            )
            .await
            .unwrap();

        for topic in ["a/x", "a/x/y", "b", "b/z/w"] {
            broker
                .send(topic, b"{}".to_vec(), &Map::new(), None)
                .await
                .unwrap();
        }

        let first = broker
            .receive("q1", Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.topic, "a/x");

        let second = broker
            .receive("q1", Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.topic, "b/z/w");

        // Nothing else matched.
        let rest = broker.receive("q1", Duration::from_millis(50)).await.unwrap();
        assert!(rest.is_none());
    }

    #[tokio::test]
    async fn overlapping_subscriptions_deliver_one_copy_per_queue() {
        let broker = broker();
        broker.connect().await.unwrap();
        broker
            .bind_queue(
                "q1",
                &[Subscription::new("a/>"), Subscription::new("a/*")],
                QueueDurability::Temporary,
            )
            .await
            .unwrap();

        broker.send("a/x", b"1".to_vec(), &Map::new(), None).await.unwrap();

        assert!(broker
            .receive("q1", Duration::from_millis(50))
            .await
            .unwrap()
            .is_some());
        assert!(broker
            .receive("q1", Duration::from_millis(50))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn connections_share_state_through_the_hub() {
        let hub = DevBrokerHub::new();
        let input = DevBroker::new(hub.state_for("dev://shared"));
        let output = DevBroker::new(hub.state_for("dev://shared"));
        input.connect().await.unwrap();
        output.connect().await.unwrap();

        input
            .bind_queue("q", &[Subscription::new("t/>")], QueueDurability::Temporary)
            .await
            .unwrap();
        output
            .send("t/1", b"x".to_vec(), &Map::new(), None)
            .await
            .unwrap();

        let received = input
            .receive("q", Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.payload, b"x");
    }

    #[tokio::test]
    async fn operations_require_a_connection() {
        let broker = broker();
        assert!(matches!(
            broker.receive("q", Duration::from_millis(1)).await,
            Err(BrokerError::NotConnected)
        ));
        assert!(matches!(
            broker.send("t", vec![], &Map::new(), None).await,
            Err(BrokerError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn publish_receipt_resolves() {
        let broker = broker();
        broker.connect().await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        broker
            .send(
                "t",
                vec![],
                &Map::new(),
                Some(Box::new(move |result| {
                    let _ = tx.send(result.is_ok());
                })),
            )
            .await
            .unwrap();
        assert!(rx.await.unwrap());
    }
}
