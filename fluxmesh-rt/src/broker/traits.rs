//! The broker abstraction every flow component speaks through.
//!
//! Two interchangeable implementations exist: the persistent JetStream
//! broker ([`super::nats::NatsBroker`]) and the in-process development
//! broker ([`super::dev::DevBroker`]). Application code above this trait
//! never sees vendor types.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;

// Layer 3: Internal module imports
use super::config::Subscription;
use super::error::BrokerError;
use super::status::ConnectionStatus;
use crate::message::NackOutcome;

/// Shared handle to a broker connection.
pub type BrokerHandle = Arc<dyn Broker>;

/// Callback resolved when the broker confirms (or refuses) a publish.
pub type PublishReceipt = Box<dyn FnOnce(Result<(), BrokerError>) + Send + 'static>;

/// Opaque handle for acknowledging a received message.
///
/// Tags are meaningful only to the connection that issued them; the
/// connection keeps the vendor message alive until the tag is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub(crate) u64);

impl DeliveryTag {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Whether a bound queue survives the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDurability {
    Durable,
    Temporary,
}

/// A message pulled off a queue, before envelope decoding.
#[derive(Debug)]
pub struct InboundMessage {
    pub payload: Vec<u8>,
    pub topic: String,
    pub user_properties: Map<String, Value>,
    /// Absent on brokers that settle on receive (dev broker).
    pub delivery: Option<DeliveryTag>,
}

/// Broker connection contract.
///
/// Guarantees required of implementations:
///
/// - **Ordering**: messages delivered from a single queue arrive in
///   enqueue order. No ordering across queues.
/// - **Receive timeout** is benign and returns `Ok(None)`.
/// - During reconnection, `receive` returns `Ok(None)` and `send` may
///   wait; neither invents failures the caller must unwind.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establish the connection, applying the configured reconnection
    /// strategy to the initial attempt.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Tear the connection down. Pending deliveries are abandoned (the
    /// broker will redeliver unacked messages per its own rules).
    async fn disconnect(&self) -> Result<(), BrokerError>;

    /// Bind a queue and attach its subscriptions.
    async fn bind_queue(
        &self,
        queue: &str,
        subscriptions: &[Subscription],
        durability: QueueDurability,
    ) -> Result<(), BrokerError>;

    /// Blocking receive with timeout from a bound queue.
    async fn receive(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<InboundMessage>, BrokerError>;

    /// Publish `payload` to `topic`.
    ///
    /// When `receipt` is given it is resolved exactly once with the
    /// broker's publish confirmation.
    async fn send(
        &self,
        topic: &str,
        payload: Vec<u8>,
        user_properties: &Map<String, Value>,
        receipt: Option<PublishReceipt>,
    ) -> Result<(), BrokerError>;

    /// Confirm durable handling of a delivery.
    async fn ack(&self, delivery: DeliveryTag) -> Result<(), BrokerError>;

    /// Reject a delivery with an outcome (`Failed` redelivers,
    /// `Rejected` terminates the message).
    async fn nack(&self, delivery: DeliveryTag, outcome: NackOutcome) -> Result<(), BrokerError>;

    /// Current connection state.
    fn connection_status(&self) -> ConnectionStatus;

    /// Watch connection-state transitions.
    fn status_watch(&self) -> watch::Receiver<ConnectionStatus>;
}
