//! Broker abstraction: connection lifecycle, queues, subscriptions,
//! publish/receive, and explicit ack/nack with outcomes.

pub mod config;
pub mod dev;
pub mod error;
pub mod nats;
pub mod status;
pub mod traits;

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;

pub use config::{BrokerConfig, BrokerType, ReconnectionStrategy, Subscription};
pub use dev::{compile_subscription, DevBroker, DevBrokerHub, DevBrokerState};
pub use error::BrokerError;
pub use nats::NatsBroker;
pub use status::{ConnectionMonitor, ConnectionStatus};
pub use traits::{
    Broker, BrokerHandle, DeliveryTag, InboundMessage, PublishReceipt, QueueDurability,
};

/// Build a broker connection for a parsed config.
///
/// Dev-type configs resolve their shared state through `hub`, so every
/// dev connection to the same URL observes one in-memory broker.
pub fn build_broker(config: &BrokerConfig, hub: &Arc<DevBrokerHub>) -> BrokerHandle {
    match config.broker_type {
        BrokerType::Dev => Arc::new(DevBroker::new(hub.state_for(&config.url))),
        BrokerType::Nats => Arc::new(NatsBroker::new(config.clone())),
    }
}

/// Pool of physical connections for configs that opt into
/// `share_connection`.
///
/// Sibling input/output components of one app reuse a connection only
/// through this explicit configuration; everything else gets its own.
#[derive(Default)]
pub struct ConnectionPool {
    entries: DashMap<String, BrokerHandle>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a connection for `config`: pooled when
    /// `share_connection` is set, fresh otherwise.
    pub fn resolve(&self, config: &BrokerConfig, hub: &Arc<DevBrokerHub>) -> BrokerHandle {
        if !config.share_connection {
            return build_broker(config, hub);
        }
        Arc::clone(
            &self
                .entries
                .entry(config.share_key())
                .or_insert_with(|| build_broker(config, hub)),
        )
    }
}
