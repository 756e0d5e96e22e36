// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

/// Failure modes of a broker connection.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Operation attempted before `connect()` or after `disconnect()`.
    #[error("broker is not connected")]
    NotConnected,

    /// The initial connection (including its retry budget) failed.
    #[error("failed to connect to broker at {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    /// The named queue was never bound on this connection.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// Queue binding failed (stream/consumer creation on the persistent broker).
    #[error("failed to bind queue {queue}: {reason}")]
    BindFailed { queue: String, reason: String },

    /// A publish was not accepted by the broker.
    #[error("publish to topic {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// Ack/nack referenced a delivery this connection no longer tracks.
    #[error("unknown delivery tag: {0}")]
    UnknownDelivery(u64),

    /// Settling a tracked delivery failed at the broker.
    #[error("failed to settle delivery {tag}: {reason}")]
    SettleFailed { tag: u64, reason: String },

    /// Invalid broker configuration.
    #[error("invalid broker config: {0}")]
    Config(String),
}
