//! `broker_output`: the flow tail that publishes results to the broker.
//!
//! Consumes `{payload, topic, user_properties}` from its input and
//! publishes the encoded payload. A failed publish is a component error
//! with nack outcome `Failed`, so the originating message stays
//! redeliverable through a broker outage.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::{json, Map, Value};

// Layer 3: Internal module imports
use super::registry::{ComponentBuild, ComponentRegistry};
use crate::broker::{BrokerConfig, BrokerHandle, ConnectionStatus};
use crate::flow::{
    Component, ComponentContext, ComponentError, ComponentInfo, ComponentOutput, ConfigParameter,
    FlowError,
};
use crate::message::{encode_payload, Envelope, NackOutcome, PayloadEncoding, PayloadFormat};

fn info() -> ComponentInfo {
    ComponentInfo::new("broker_output", "Publish flow results to the broker")
        .with_parameters(vec![
            ConfigParameter::optional(
                "payload_encoding",
                Some(json!("utf-8")),
                "Wire encoding of outbound payloads",
            ),
            ConfigParameter::optional(
                "payload_format",
                Some(json!("json")),
                "Wire format of outbound payloads",
            ),
            ConfigParameter::optional(
                "propagate_acknowledgements",
                Some(json!(true)),
                "Fire the envelope's ack chain after a confirmed publish",
            ),
        ])
        .with_schemas(
            json!({
                "type": "object",
                "properties": {
                    "payload": {"type": "any"},
                    "topic": {"type": "string"},
                    "user_properties": {"type": "object"},
                },
                "required": ["payload", "topic"],
            }),
            Value::Null,
        )
}

pub struct BrokerOutput {
    broker: BrokerHandle,
    encoding: PayloadEncoding,
    format: PayloadFormat,
    propagate_acknowledgements: bool,
    messages_sent: u64,
}

impl BrokerOutput {
    pub fn from_build(build: &ComponentBuild<'_>) -> Result<Self, FlowError> {
        let broker_config = BrokerConfig::from_value(&build.node.component_config)?;
        let broker = build
            .services
            .broker_pool
            .resolve(&broker_config, &build.services.dev_broker_hub);
        Ok(Self {
            broker,
            encoding: broker_config.payload_encoding,
            format: broker_config.payload_format,
            propagate_acknowledgements: build
                .node
                .config_bool("propagate_acknowledgements", true),
            messages_sent: 0,
        })
    }

    /// Shared handle to the output's broker connection.
    pub fn broker(&self) -> BrokerHandle {
        Arc::clone(&self.broker)
    }
}

#[async_trait]
impl Component for BrokerOutput {
    fn kind(&self) -> &'static str {
        "broker_output"
    }

    async fn on_start(&mut self, _ctx: &ComponentContext) -> Result<(), ComponentError> {
        self.broker.connect().await?;
        Ok(())
    }

    async fn process(
        &mut self,
        _env: &mut Envelope,
        input: Value,
    ) -> Result<ComponentOutput, ComponentError> {
        let topic = input
            .get("topic")
            .and_then(Value::as_str)
            .ok_or_else(|| ComponentError::InvalidInput("broker_output requires 'topic'".into()))?
            .to_string();
        let payload = input.get("payload").cloned().unwrap_or(Value::Null);
        let user_properties: Map<String, Value> = input
            .get("user_properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let bytes = encode_payload(&payload, self.encoding, self.format)?;
        self.broker
            .send(&topic, bytes, &user_properties, None)
            .await?;
        self.messages_sent += 1;
        tracing::debug!(topic = %topic, "Published message");

        if self.propagate_acknowledgements {
            // Tail position: emitting fires the envelope's ack chain.
            Ok(ComponentOutput::Emit(input))
        } else {
            Ok(ComponentOutput::Consumed)
        }
    }

    fn nack_outcome_for(&self, error: &ComponentError) -> NackOutcome {
        // A failed publish is redeliverable; malformed input is poison.
        match error {
            ComponentError::Broker(_) => NackOutcome::Failed,
            _ => NackOutcome::Rejected,
        }
    }

    fn metrics(&self) -> Vec<(String, Value)> {
        vec![("messages_sent".to_string(), json!(self.messages_sent))]
    }

    fn connection_status(&self) -> Option<ConnectionStatus> {
        Some(self.broker.connection_status())
    }

    async fn on_stop(&mut self) {
        if let Err(e) = self.broker.disconnect().await {
            tracing::debug!(error = %e, "Error disconnecting broker output");
        }
    }
}

pub(crate) fn register(registry: &ComponentRegistry) {
    registry.register(
        info(),
        Arc::new(|build| Ok(Box::new(BrokerOutput::from_build(build)?) as Box<dyn Component>)),
    );
}
