//! Persistent broker backed by NATS JetStream.
//!
//! Queue semantics map onto JetStream primitives: a bound queue becomes a
//! stream capturing the queue's subscription subjects plus a pull consumer
//! (durable or ephemeral) with explicit acks. Nack outcomes map to
//! `AckKind::Nak` (redeliver) and `AckKind::Term` (no redelivery).
//!
//! Topic levels use `/` in configuration and on envelopes; JetStream
//! subjects are `.`-separated, so subjects are translated at the boundary
//! in both directions (`a/b/>` ↔ `a.b.>`).

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_nats::jetstream;
use async_nats::jetstream::consumer::{pull, PullConsumer};
use async_nats::jetstream::AckKind;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::watch;

// Layer 3: Internal module imports
use super::config::{BrokerConfig, ReconnectionStrategy, Subscription};
use super::error::BrokerError;
use super::status::{ConnectionMonitor, ConnectionStatus};
use super::traits::{Broker, DeliveryTag, InboundMessage, PublishReceipt, QueueDurability};
use crate::message::NackOutcome;

fn to_subject(topic: &str) -> String {
    topic.replace('/', ".")
}

fn from_subject(subject: &str) -> String {
    subject.replace('.', "/")
}

fn stream_name_for(queue: &str) -> String {
    queue
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

#[derive(Clone)]
struct NatsInner {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

/// JetStream-backed implementation of the [`Broker`] contract.
pub struct NatsBroker {
    config: BrokerConfig,
    inner: parking_lot::Mutex<Option<NatsInner>>,
    consumers: DashMap<String, PullConsumer>,
    deliveries: DashMap<u64, jetstream::Message>,
    next_tag: AtomicU64,
    monitor: ConnectionMonitor,
}

impl NatsBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            inner: parking_lot::Mutex::new(None),
            consumers: DashMap::new(),
            deliveries: DashMap::new(),
            next_tag: AtomicU64::new(1),
            monitor: ConnectionMonitor::new(),
        }
    }

    fn inner(&self) -> Result<NatsInner, BrokerError> {
        self.inner.lock().clone().ok_or(BrokerError::NotConnected)
    }

    fn connect_options(&self) -> async_nats::ConnectOptions {
        let mut options = async_nats::ConnectOptions::new().retry_on_initial_connect();

        if let (Some(username), Some(password)) =
            (self.config.username.clone(), self.config.password.clone())
        {
            options = options.user_and_password(username, password);
        }

        options = match self.config.reconnection {
            ReconnectionStrategy::ForeverRetry { retry_interval } => options
                .max_reconnects(None)
                .reconnect_delay_callback(move |_attempts| retry_interval),
            ReconnectionStrategy::ParametrizedRetry { retry_count, retry_wait } => options
                .max_reconnects(Some(retry_count))
                .reconnect_delay_callback(move |_attempts| retry_wait),
        };

        let monitor = self.monitor.clone();
        options.event_callback(move |event| {
            let monitor = monitor.clone();
            async move {
                match event {
                    async_nats::Event::Connected => monitor.set(ConnectionStatus::Connected),
                    async_nats::Event::Disconnected => monitor.set(ConnectionStatus::Reconnecting),
                    async_nats::Event::Closed => monitor.set(ConnectionStatus::Disconnected),
                    other => {
                        tracing::debug!(event = %other, "Broker client event");
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        if self.inner.lock().is_some() {
            return Ok(());
        }

        let client = self
            .connect_options()
            .connect(&self.config.url)
            .await
            .map_err(|e| BrokerError::ConnectFailed {
                url: self.config.url.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(url = %self.config.url, "Connected to broker");
        let jetstream = jetstream::new(client.clone());
        *self.inner.lock() = Some(NatsInner { client, jetstream });
        self.monitor.set(ConnectionStatus::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let inner = self.inner.lock().take();
        self.consumers.clear();
        self.deliveries.clear();
        if let Some(inner) = inner {
            if let Err(e) = inner.client.flush().await {
                tracing::debug!(error = %e, "Error flushing broker client on disconnect");
            }
        }
        self.monitor.set(ConnectionStatus::Disconnected);
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        subscriptions: &[Subscription],
        durability: QueueDurability,
    ) -> Result<(), BrokerError> {
        let inner = self.inner()?;

        let mut subjects: Vec<String> = subscriptions
            .iter()
            .map(|s| to_subject(&s.topic))
            .collect();
        if subjects.is_empty() {
            subjects.push(to_subject(queue));
        }

        let stream_name = stream_name_for(queue);
        let stream = inner
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name.clone(),
                subjects: subjects.clone(),
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                ..Default::default()
            })
            .await
            .map_err(|e| BrokerError::BindFailed {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        let consumer_config = pull::Config {
            durable_name: match durability {
                QueueDurability::Durable => Some(stream_name.clone()),
                QueueDurability::Temporary => None,
            },
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        };
        let consumer = stream
            .get_or_create_consumer(&stream_name, consumer_config)
            .await
            .map_err(|e| BrokerError::BindFailed {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        self.consumers.insert(queue.to_string(), consumer);
        tracing::debug!(
            queue,
            stream = %stream_name,
            subjects = ?subjects,
            temporary = matches!(durability, QueueDurability::Temporary),
            "Queue bound"
        );
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<InboundMessage>, BrokerError> {
        let consumer = self
            .consumers
            .get(queue)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;

        let batch = match consumer
            .fetch()
            .max_messages(1)
            .expires(timeout)
            .messages()
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                // Outages surface as empty receives; reconnection is the
                // client's job.
                tracing::debug!(queue, error = %e, "Fetch failed, treating as empty receive");
                return Ok(None);
            }
        };

        let mut batch = std::pin::pin!(batch);
        let message = match batch.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::debug!(queue, error = %e, "Receive error, treating as empty receive");
                return Ok(None);
            }
            None => return Ok(None),
        };

        let mut user_properties = Map::new();
        if let Some(headers) = &message.headers {
            for (name, values) in headers.iter() {
                if let Some(first) = values.first() {
                    user_properties
                        .insert(name.to_string(), Value::String(first.to_string()));
                }
            }
        }

        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let inbound = InboundMessage {
            payload: message.payload.to_vec(),
            topic: from_subject(&message.subject),
            user_properties,
            delivery: Some(DeliveryTag(tag)),
        };
        self.deliveries.insert(tag, message);
        Ok(Some(inbound))
    }

    async fn send(
        &self,
        topic: &str,
        payload: Vec<u8>,
        user_properties: &Map<String, Value>,
        receipt: Option<PublishReceipt>,
    ) -> Result<(), BrokerError> {
        let inner = self.inner()?;
        let subject = to_subject(topic);

        let mut headers = async_nats::HeaderMap::new();
        for (key, value) in user_properties {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            headers.insert(key.as_str(), text.as_str());
        }

        let publish = inner
            .jetstream
            .publish_with_headers(subject, headers, payload.into())
            .await;

        let result = match publish {
            Ok(ack_future) => ack_future.await.map(|_| ()).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => {
                if let Some(receipt) = receipt {
                    receipt(Ok(()));
                }
                Ok(())
            }
            Err(reason) => {
                if let Some(receipt) = receipt {
                    receipt(Err(BrokerError::PublishFailed {
                        topic: topic.to_string(),
                        reason: reason.clone(),
                    }));
                }
                Err(BrokerError::PublishFailed {
                    topic: topic.to_string(),
                    reason,
                })
            }
        }
    }

    async fn ack(&self, delivery: DeliveryTag) -> Result<(), BrokerError> {
        let (_, message) = self
            .deliveries
            .remove(&delivery.0)
            .ok_or(BrokerError::UnknownDelivery(delivery.0))?;
        message.ack().await.map_err(|e| BrokerError::SettleFailed {
            tag: delivery.0,
            reason: e.to_string(),
        })
    }

    async fn nack(&self, delivery: DeliveryTag, outcome: NackOutcome) -> Result<(), BrokerError> {
        let (_, message) = self
            .deliveries
            .remove(&delivery.0)
            .ok_or(BrokerError::UnknownDelivery(delivery.0))?;
        let kind = match outcome {
            NackOutcome::Failed => AckKind::Nak(None),
            NackOutcome::Rejected => AckKind::Term,
        };
        message
            .ack_with(kind)
            .await
            .map_err(|e| BrokerError::SettleFailed {
                tag: delivery.0,
                reason: e.to_string(),
            })
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.monitor.get()
    }

    fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.monitor.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_translation_round_trips() {
        assert_eq!(to_subject("a/b/c"), "a.b.c");
        assert_eq!(to_subject("a/*/c"), "a.*.c");
        assert_eq!(to_subject("a/>"), "a.>");
        assert_eq!(from_subject("a.b.c"), "a/b/c");
    }

    #[test]
    fn stream_names_are_sanitized() {
        assert_eq!(stream_name_for("q/orders/input"), "q-orders-input");
        assert_eq!(stream_name_for("plain_queue-1"), "plain_queue-1");
    }

    #[test]
    fn nack_outcomes_map_to_ack_kinds() {
        // Compile-time pairing check; broker-side behavior needs a live server.
        let failed = match NackOutcome::Failed {
            NackOutcome::Failed => AckKind::Nak(None),
            NackOutcome::Rejected => AckKind::Term,
        };
        assert!(matches!(failed, AckKind::Nak(None)));
    }
}
