// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde_json::Value;

// Layer 3: Internal module imports
use super::error::BrokerError;
use crate::message::{PayloadEncoding, PayloadFormat};

/// A topic subscription, as configured (`[{topic: "a/b/>"}]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
}

impl Subscription {
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into() }
    }
}

/// Which broker implementation a config selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerType {
    /// In-process development broker.
    Dev,
    /// Persistent broker (NATS JetStream).
    #[default]
    Nats,
}

/// Reconnection policy for the persistent broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionStrategy {
    /// Retry forever with a fixed interval.
    ForeverRetry { retry_interval: Duration },
    /// Bounded retries with a fixed wait.
    ParametrizedRetry { retry_count: usize, retry_wait: Duration },
}

impl Default for ReconnectionStrategy {
    fn default() -> Self {
        // 20 retries at 3 seconds.
        ReconnectionStrategy::ParametrizedRetry {
            retry_count: 20,
            retry_wait: Duration::from_millis(3000),
        }
    }
}

/// Parsed broker section of a component or app configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub broker_type: BrokerType,
    pub url: String,
    pub queue_name: Option<String>,
    pub subscriptions: Vec<Subscription>,
    pub temporary_queue: bool,
    pub reconnection: ReconnectionStrategy,
    pub payload_encoding: PayloadEncoding,
    pub payload_format: PayloadFormat,
    /// Reuse one physical connection between sibling input/output
    /// components of the same app.
    pub share_connection: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_type: BrokerType::Nats,
            url: "nats://localhost:4222".to_string(),
            queue_name: None,
            subscriptions: Vec::new(),
            temporary_queue: false,
            reconnection: ReconnectionStrategy::default(),
            payload_encoding: PayloadEncoding::Utf8,
            payload_format: PayloadFormat::Json,
            share_connection: false,
            username: None,
            password: None,
        }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

impl BrokerConfig {
    /// Parse a `broker` / `component_config` block.
    ///
    /// Recognized keys: `broker_type` | `dev_mode`, `broker_url`,
    /// `broker_username`, `broker_password`, `broker_queue_name` |
    /// `queue_name`, `broker_subscriptions` | `subscriptions`,
    /// `temporary_queue`, `reconnection_strategy` (+ `retry_interval` /
    /// `retry_count` / `retry_wait`), `payload_encoding`,
    /// `payload_format`, `share_connection`.
    pub fn from_value(value: &Value) -> Result<Self, BrokerError> {
        let mut config = BrokerConfig::default();

        let dev_mode = value.get("dev_mode").and_then(Value::as_bool).unwrap_or(false);
        match string_field(value, "broker_type").as_deref() {
            Some("dev") => config.broker_type = BrokerType::Dev,
            Some("nats") | None => {
                config.broker_type = if dev_mode { BrokerType::Dev } else { BrokerType::Nats };
            }
            Some(other) => {
                return Err(BrokerError::Config(format!("unknown broker_type: {other}")));
            }
        }

        if let Some(url) = string_field(value, "broker_url") {
            config.url = url;
        }
        config.username = string_field(value, "broker_username");
        config.password = string_field(value, "broker_password");
        config.queue_name = string_field(value, "broker_queue_name")
            .or_else(|| string_field(value, "queue_name"));
        config.temporary_queue = value
            .get("temporary_queue")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        config.share_connection = value
            .get("share_connection")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let subscriptions = value
            .get("broker_subscriptions")
            .or_else(|| value.get("subscriptions"));
        if let Some(subscriptions) = subscriptions {
            let list = subscriptions
                .as_array()
                .ok_or_else(|| BrokerError::Config("subscriptions must be a list".to_string()))?;
            for entry in list {
                let topic = entry
                    .get("topic")
                    .and_then(Value::as_str)
                    .ok_or_else(|| BrokerError::Config("subscription missing 'topic'".to_string()))?;
                config.subscriptions.push(Subscription::new(topic));
            }
        }

        match string_field(value, "reconnection_strategy").as_deref() {
            Some("forever_retry") => {
                let interval = value
                    .get("retry_interval")
                    .and_then(Value::as_u64)
                    .unwrap_or(3000);
                config.reconnection = ReconnectionStrategy::ForeverRetry {
                    retry_interval: Duration::from_millis(interval),
                };
            }
            Some("parametrized_retry") => {
                let count = value.get("retry_count").and_then(Value::as_u64).unwrap_or(20);
                let wait = value.get("retry_wait").and_then(Value::as_u64).unwrap_or(3000);
                config.reconnection = ReconnectionStrategy::ParametrizedRetry {
                    retry_count: count as usize,
                    retry_wait: Duration::from_millis(wait),
                };
            }
            Some(other) => {
                return Err(BrokerError::Config(format!(
                    "unknown reconnection_strategy: {other}"
                )));
            }
            None => {}
        }

        if let Some(encoding) = string_field(value, "payload_encoding") {
            config.payload_encoding = encoding
                .parse()
                .map_err(|e| BrokerError::Config(format!("{e}")))?;
        }
        if let Some(format) = string_field(value, "payload_format") {
            config.payload_format = format
                .parse()
                .map_err(|e| BrokerError::Config(format!("{e}")))?;
        }

        Ok(config)
    }

    /// Key under which a shared connection is pooled.
    pub fn share_key(&self) -> String {
        format!("{}:{:?}", self.url, self.broker_type)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_follow_the_persistent_broker() {
        let config = BrokerConfig::from_value(&json!({})).unwrap();
        assert_eq!(config.broker_type, BrokerType::Nats);
        assert_eq!(
            config.reconnection,
            ReconnectionStrategy::ParametrizedRetry {
                retry_count: 20,
                retry_wait: Duration::from_millis(3000),
            }
        );
        assert_eq!(config.payload_encoding, PayloadEncoding::Utf8);
        assert_eq!(config.payload_format, PayloadFormat::Json);
    }

    #[test]
    fn parses_a_full_block() {
        let config = BrokerConfig::from_value(&json!({
            "broker_type": "dev",
            "broker_url": "dev://local",
            "queue_name": "q/app/input",
            "subscriptions": [{"topic": "orders/>"}, {"topic": "audit/*"}],
            "reconnection_strategy": "forever_retry",
            "retry_interval": 500,
            "payload_encoding": "base64",
            "payload_format": "yaml",
            "share_connection": true,
        }))
        .unwrap();

        assert_eq!(config.broker_type, BrokerType::Dev);
        assert_eq!(config.queue_name.as_deref(), Some("q/app/input"));
        assert_eq!(
            config.subscriptions,
            vec![Subscription::new("orders/>"), Subscription::new("audit/*")]
        );
        assert_eq!(
            config.reconnection,
            ReconnectionStrategy::ForeverRetry {
                retry_interval: Duration::from_millis(500),
            }
        );
        assert_eq!(config.payload_encoding, PayloadEncoding::Base64);
        assert_eq!(config.payload_format, PayloadFormat::Yaml);
        assert!(config.share_connection);
    }

    #[test]
    fn dev_mode_flag_selects_the_dev_broker() {
        let config = BrokerConfig::from_value(&json!({"dev_mode": true})).unwrap();
        assert_eq!(config.broker_type, BrokerType::Dev);
    }

    #[test]
    fn bad_subscription_shape_is_rejected() {
        assert!(BrokerConfig::from_value(&json!({"subscriptions": "orders/>"})).is_err());
        assert!(BrokerConfig::from_value(&json!({"subscriptions": [{"name": "x"}]})).is_err());
    }
}
