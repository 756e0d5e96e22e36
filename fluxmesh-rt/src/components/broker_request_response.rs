//! `broker_request_response`: the correlation component behind the
//! request/response controller.
//!
//! Each controller instance owns one of these. On start it binds a
//! temporary reply queue subscribed to `<response_topic_prefix>/<uuid>/>`
//! and spawns a reader task forwarding decoded responses downstream (to
//! the controller's sink). `process` publishes the request with the
//! per-request reply topic inserted into the user properties; responders
//! echo their responses to that topic.
//!
//! One request is outstanding at a time (the controller serializes);
//! responses whose reply topic does not match the current request id are
//! late arrivals for a timed-out request and are dropped.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

// Layer 3: Internal module imports
use super::registry::{ComponentBuild, ComponentRegistry};
use crate::broker::{BrokerConfig, BrokerHandle, QueueDurability, Subscription};
use crate::flow::{
    Component, ComponentContext, ComponentError, ComponentInfo, ComponentOutput, ConfigParameter,
    FlowError,
};
use crate::message::{
    decode_payload, encode_payload, Envelope, Event, PayloadEncoding, PayloadFormat,
};

const DEFAULT_REPLY_TOPIC_KEY: &str = "reply_topic";

fn info() -> ComponentInfo {
    ComponentInfo::new(
        "broker_request_response",
        "Publish requests and demultiplex correlated responses from a per-instance reply queue",
    )
    .with_parameters(vec![
        ConfigParameter::optional(
            "response_topic_prefix",
            Some(json!("reply")),
            "Prefix of generated reply topics",
        ),
        ConfigParameter::optional(
            "response_queue_prefix",
            Some(json!("reply-queue")),
            "Prefix of the generated reply queue name",
        ),
        ConfigParameter::optional(
            "user_properties_reply_topic_key",
            Some(json!(DEFAULT_REPLY_TOPIC_KEY)),
            "User-property key carrying the reply topic",
        ),
        ConfigParameter::optional(
            "request_expiry_ms",
            Some(json!(30000)),
            "Per-request expiry budget",
        ),
    ])
}

pub struct BrokerRequestResponse {
    broker: BrokerHandle,
    reply_queue: String,
    reply_topic_prefix: String,
    reply_topic_key: String,
    encoding: PayloadEncoding,
    format: PayloadFormat,
    /// Request id of the in-flight request; stale responses are dropped.
    current_request: Arc<Mutex<Option<String>>>,
    reader: Option<JoinHandle<()>>,
}

impl BrokerRequestResponse {
    pub fn from_build(build: &ComponentBuild<'_>) -> Result<Self, FlowError> {
        let broker_config = BrokerConfig::from_value(&build.node.component_config)?;
        let broker = build
            .services
            .broker_pool
            .resolve(&broker_config, &build.services.dev_broker_hub);

        let instance_id = Uuid::new_v4();
        let topic_prefix = build
            .node
            .config_str("response_topic_prefix")
            .unwrap_or("reply");
        let queue_prefix = build
            .node
            .config_str("response_queue_prefix")
            .unwrap_or("reply-queue");
        let reply_topic_key = build
            .node
            .config_str("user_properties_reply_topic_key")
            .unwrap_or(DEFAULT_REPLY_TOPIC_KEY)
            .to_string();

        Ok(Self {
            broker,
            reply_queue: format!("{queue_prefix}-{instance_id}"),
            reply_topic_prefix: format!("{topic_prefix}/{instance_id}"),
            reply_topic_key,
            encoding: broker_config.payload_encoding,
            format: broker_config.payload_format,
            current_request: Arc::new(Mutex::new(None)),
            reader: None,
        })
    }
}

#[async_trait]
impl Component for BrokerRequestResponse {
    fn kind(&self) -> &'static str {
        "broker_request_response"
    }

    async fn on_start(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        self.broker.connect().await?;
        self.broker
            .bind_queue(
                &self.reply_queue,
                &[Subscription::new(format!("{}/>", self.reply_topic_prefix))],
                QueueDurability::Temporary,
            )
            .await?;

        let broker = Arc::clone(&self.broker);
        let reply_queue = self.reply_queue.clone();
        let encoding = self.encoding;
        let format = self.format;
        let current_request = Arc::clone(&self.current_request);
        let emitter = ctx.emitter.clone();
        let cancel = ctx.cancel.clone();

        self.reader = Some(tokio::spawn(async move {
            while !cancel.is_cancelled() {
                let inbound = match broker.receive(&reply_queue, Duration::from_secs(1)).await {
                    Ok(Some(inbound)) => inbound,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Reply queue receive failed");
                        continue;
                    }
                };

                // The reply queue is fire-and-forget; settle immediately.
                if let Some(delivery) = inbound.delivery {
                    let _ = broker.ack(delivery).await;
                }

                let expected = current_request.lock().clone();
                let request_id = inbound.topic.rsplit('/').next().unwrap_or_default();
                if expected.as_deref() != Some(request_id) {
                    tracing::debug!(topic = %inbound.topic, "Dropping response with no waiter");
                    continue;
                }

                let payload = match decode_payload(&inbound.payload, encoding, format) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(error = %e, topic = %inbound.topic, "Undecodable response");
                        continue;
                    }
                };

                let env = Envelope::new(payload, inbound.topic, inbound.user_properties);
                emitter.emit(Event::Message(env)).await;
            }
        }));
        Ok(())
    }

    async fn process(
        &mut self,
        env: &mut Envelope,
        input: Value,
    ) -> Result<ComponentOutput, ComponentError> {
        let topic = input
            .get("topic")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ComponentError::InvalidInput("broker_request_response requires 'topic'".into())
            })?
            .to_string();
        let payload = input.get("payload").cloned().unwrap_or(Value::Null);
        let mut user_properties: Map<String, Value> = input
            .get("user_properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let request_id = Uuid::new_v4().to_string();
        let reply_topic = format!("{}/{}", self.reply_topic_prefix, request_id);
        user_properties.insert(
            self.reply_topic_key.clone(),
            Value::String(reply_topic.clone()),
        );
        *self.current_request.lock() = Some(request_id);

        let bytes = encode_payload(&payload, self.encoding, self.format)?;
        self.broker.send(&topic, bytes, &user_properties, None).await?;
        tracing::debug!(topic = %topic, reply_topic = %reply_topic, "Request published");

        // Request acknowledgements propagate once the requester is done
        // with the envelope; the broker publish completed, so settle now.
        env.call_acknowledgements();
        Ok(ComponentOutput::Consumed)
    }

    async fn on_stop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Err(e) = self.broker.disconnect().await {
            tracing::debug!(error = %e, "Error disconnecting request/response broker");
        }
    }
}

pub(crate) fn register(registry: &ComponentRegistry) {
    registry.register(
        info(),
        Arc::new(|build| {
            Ok(Box::new(BrokerRequestResponse::from_build(build)?) as Box<dyn Component>)
        }),
    );
}
