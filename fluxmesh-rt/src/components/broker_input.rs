//! `broker_input`: the flow head that pulls messages off a broker queue.
//!
//! For every emitted envelope the component registers an ack callback and
//! a nack callback capturing the broker handle and the delivery tag, so
//! the broker-facing settlement fires exactly when the flow settles the
//! envelope, wherever that happens downstream.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::{json, Value};

// Layer 3: Internal module imports
use super::registry::{ComponentBuild, ComponentRegistry};
use crate::broker::{
    BrokerConfig, BrokerHandle, ConnectionStatus, DeliveryTag, QueueDurability, Subscription,
};
use crate::flow::{
    Component, ComponentContext, ComponentError, ComponentInfo, ComponentOutput, ConfigParameter,
    FlowError,
};
use crate::message::{
    decode_payload, AckCallback, Envelope, NackCallback, NackOutcome, PayloadEncoding,
    PayloadFormat,
};

fn info() -> ComponentInfo {
    ComponentInfo::new(
        "broker_input",
        "Connect to a broker queue and feed its messages into the flow",
    )
    .with_parameters(vec![
        // Accepted as either broker_queue_name or queue_name; presence is
        // enforced by the factory.
        ConfigParameter::optional("broker_queue_name", None, "Queue to bind and consume from"),
        ConfigParameter::optional("temporary_queue", Some(json!(false)), "Use a temporary queue"),
        ConfigParameter::optional(
            "payload_encoding",
            Some(json!("utf-8")),
            "Wire encoding of inbound payloads",
        ),
        ConfigParameter::optional(
            "payload_format",
            Some(json!("json")),
            "Wire format of inbound payloads",
        ),
    ])
    .with_schemas(
        Value::Null,
        json!({
            "type": "object",
            "properties": {
                "payload": {"type": "any"},
                "topic": {"type": "string"},
                "user_properties": {"type": "object"},
            },
        }),
    )
}

pub struct BrokerInput {
    broker: BrokerHandle,
    queue_name: String,
    subscriptions: Vec<Subscription>,
    durability: QueueDurability,
    encoding: PayloadEncoding,
    format: PayloadFormat,
    current_delivery: Option<DeliveryTag>,
    messages_received: u64,
}

impl BrokerInput {
    pub fn from_build(build: &ComponentBuild<'_>) -> Result<Self, FlowError> {
        let broker_config = BrokerConfig::from_value(&build.node.component_config)?;
        let queue_name = broker_config.queue_name.clone().ok_or_else(|| {
            FlowError::Config(format!(
                "broker_input {} requires a queue name",
                build.node.component_name
            ))
        })?;

        let broker = build
            .services
            .broker_pool
            .resolve(&broker_config, &build.services.dev_broker_hub);
        Ok(Self {
            broker,
            queue_name,
            subscriptions: broker_config.subscriptions.clone(),
            durability: if broker_config.temporary_queue {
                QueueDurability::Temporary
            } else {
                QueueDurability::Durable
            },
            encoding: broker_config.payload_encoding,
            format: broker_config.payload_format,
            current_delivery: None,
            messages_received: 0,
        })
    }
}

#[async_trait]
impl Component for BrokerInput {
    fn kind(&self) -> &'static str {
        "broker_input"
    }

    async fn on_start(&mut self, _ctx: &ComponentContext) -> Result<(), ComponentError> {
        self.broker.connect().await?;
        self.broker
            .bind_queue(&self.queue_name, &self.subscriptions, self.durability)
            .await?;
        Ok(())
    }

    fn is_source(&self) -> bool {
        true
    }

    async fn next_message(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Envelope>, ComponentError> {
        let Some(inbound) = self.broker.receive(&self.queue_name, timeout).await? else {
            return Ok(None);
        };

        let payload = match decode_payload(&inbound.payload, self.encoding, self.format) {
            Ok(payload) => payload,
            Err(error) => {
                // Undecodable payloads are poison; reject before raising.
                if let Some(delivery) = inbound.delivery {
                    let _ = self.broker.nack(delivery, NackOutcome::Rejected).await;
                }
                return Err(error.into());
            }
        };

        self.current_delivery = inbound.delivery;
        self.messages_received += 1;
        Ok(Some(Envelope::new(
            payload,
            inbound.topic,
            inbound.user_properties,
        )))
    }

    async fn process(
        &mut self,
        env: &mut Envelope,
        _input: Value,
    ) -> Result<ComponentOutput, ComponentError> {
        Ok(ComponentOutput::Emit(json!({
            "payload": env.payload().clone(),
            "topic": env.topic(),
            "user_properties": env.user_properties().clone(),
        })))
    }

    fn make_ack_callback(&mut self) -> Option<AckCallback> {
        let delivery = self.current_delivery?;
        let broker = Arc::clone(&self.broker);
        Some(Box::new(move || {
            tokio::spawn(async move {
                if let Err(e) = broker.ack(delivery).await {
                    tracing::warn!(tag = delivery.value(), error = %e, "Broker ack failed");
                }
            });
        }))
    }

    fn make_nack_callback(&mut self) -> Option<NackCallback> {
        let delivery = self.current_delivery?;
        let broker = Arc::clone(&self.broker);
        Some(Box::new(move |outcome| {
            tokio::spawn(async move {
                if let Err(e) = broker.nack(delivery, outcome).await {
                    tracing::warn!(tag = delivery.value(), error = %e, "Broker nack failed");
                }
            });
        }))
    }

    fn metrics(&self) -> Vec<(String, Value)> {
        vec![("messages_received".to_string(), json!(self.messages_received))]
    }

    fn connection_status(&self) -> Option<ConnectionStatus> {
        Some(self.broker.connection_status())
    }

    async fn on_stop(&mut self) {
        if let Err(e) = self.broker.disconnect().await {
            tracing::debug!(error = %e, "Error disconnecting broker input");
        }
    }
}

pub(crate) fn register(registry: &ComponentRegistry) {
    registry.register(
        info(),
        Arc::new(|build| Ok(Box::new(BrokerInput::from_build(build)?) as Box<dyn Component>)),
    );
}
