//! Broker adapter: maps between broker topics and command/control
//! records.
//!
//! Topic scheme:
//!
//! ```text
//! <namespace>/<prefix>/<verb>/<endpoint-path>             requests
//! <reply-prefix>/<prefix>/response/<request-id>           responses
//! <namespace>/<prefix>/status/<entity>                    status
//! <namespace>/<prefix>/metrics/<entity>                   metrics
//! <namespace>/<prefix>/registry                           registry
//! <namespace>/<prefix>/trace/<entity>/<level>             traces
//! ```
//!
//! Outbound publishes are staged on an unbounded channel and pumped into
//! the response flow's head (a `broker_output` component), so publishers
//! never block on broker backpressure from synchronous contexts.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// Layer 3: Internal module imports
use super::router::{CommandRequest, CommandResponse};
use super::tracing::TracePublisher;
use crate::flow::{FlowEmitter, NextLink};
use crate::message::{Envelope, Event};

pub const DEFAULT_NAMESPACE: &str = "fluxmesh";
pub const DEFAULT_TOPIC_PREFIX: &str = "fm-control/v1";

/// The command verbs the plane subscribes to.
pub const COMMAND_VERBS: &[&str] = &["GET", "POST", "PUT", "DELETE"];

pub struct BrokerAdapter {
    namespace: String,
    topic_prefix: String,
    outbound_tx: mpsc::UnboundedSender<Envelope>,
    outbound_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
}

impl BrokerAdapter {
    pub fn new(namespace: &str, topic_prefix: &str) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tracing::info!(namespace, topic_prefix, "Broker adapter initialized");
        Self {
            namespace: namespace.to_string(),
            topic_prefix: topic_prefix.to_string(),
            outbound_tx,
            outbound_rx: parking_lot::Mutex::new(Some(outbound_rx)),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    /// The subscriptions the command queue binds.
    pub fn command_subscriptions(&self) -> Vec<String> {
        COMMAND_VERBS
            .iter()
            .map(|verb| format!("{}/{}/{}/>", self.namespace, self.topic_prefix, verb))
            .collect()
    }

    /// Start pumping staged publishes into the response flow's head.
    pub fn attach_response_flow(
        &self,
        response_input: mpsc::Sender<Event>,
        cancel: CancellationToken,
    ) {
        let Some(mut rx) = self.outbound_rx.lock().take() else {
            return;
        };
        let emitter = FlowEmitter::new(NextLink::Channel(response_input), cancel.clone());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    envelope = rx.recv() => {
                        let Some(envelope) = envelope else { return };
                        emitter.emit(Event::Message(envelope)).await;
                    }
                }
            }
        });
    }

    fn command_topic_parts<'a>(&self, topic: &'a str) -> Option<(&'a str, String)> {
        let prefix = format!("{}/{}/", self.namespace, self.topic_prefix);
        let remainder = topic.strip_prefix(&prefix)?;
        let (verb, path) = remainder.split_once('/')?;
        Some((verb, format!("/{path}")))
    }

    /// Parse an inbound broker message into a command request.
    ///
    /// Returns `None` (with a warning) for messages on non-command
    /// topics.
    pub fn parse_command(&self, env: &Envelope) -> Option<CommandRequest> {
        let topic = env.topic();
        let Some((verb, endpoint)) = self.command_topic_parts(topic) else {
            tracing::warn!(topic, "Received message on non-command topic");
            return None;
        };
        if !COMMAND_VERBS.contains(&verb) {
            tracing::warn!(topic, verb, "Unknown command verb");
            return None;
        }

        let payload = env.payload();
        let request_id = payload
            .get("request_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let reply_to_topic_prefix = payload
            .get("reply_to_topic_prefix")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                env.user_properties()
                    .get("reply_to_topic_prefix")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });

        Some(CommandRequest {
            request_id,
            verb: verb.to_string(),
            endpoint,
            query_params: payload
                .get("query_params")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            body: payload.get("body").cloned().unwrap_or(Value::Null),
            reply_to_topic_prefix,
            timestamp: payload
                .get("timestamp")
                .and_then(Value::as_str)
                .map(str::to_string),
            source: payload
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        })
    }

    fn stage_publish(&self, topic: String, payload: Value) {
        let mut env = Envelope::empty();
        env.set_previous(json!({
            "payload": payload,
            "topic": topic,
            "user_properties": Map::<String, Value>::new(),
        }));
        if self.outbound_tx.send(env).is_err() {
            tracing::warn!("Command/control outbound channel closed");
        }
    }

    /// Publish a response record to the requester's reply topic.
    pub fn publish_response(&self, response: &CommandResponse) {
        let Some(reply_prefix) = &response.reply_to_topic_prefix else {
            tracing::warn!(
                request_id = %response.request_id,
                "No reply_to_topic_prefix in request, cannot publish response"
            );
            return;
        };
        let topic = format!(
            "{}/{}/response/{}",
            reply_prefix, self.topic_prefix, response.request_id
        );
        tracing::debug!(topic = %topic, status = response.status_code, "Publishing response");
        self.stage_publish(topic, response.to_value());
    }

    /// One-way status notification.
    pub fn publish_status(&self, entity_id: &str, entity_type: &str, status: &str, details: Value) {
        let topic = format!("{}/{}/status/{}", self.namespace, self.topic_prefix, entity_id);
        self.stage_publish(
            topic,
            json!({
                "entity_id": entity_id,
                "entity_type": entity_type,
                "status": status,
                "details": details,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
    }

    /// One-way metrics notification.
    pub fn publish_metrics(&self, entity_id: &str, entity_type: &str, metrics: Value) {
        let topic = format!("{}/{}/metrics/{}", self.namespace, self.topic_prefix, entity_id);
        self.stage_publish(
            topic,
            json!({
                "entity_id": entity_id,
                "entity_type": entity_type,
                "metrics": metrics,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
    }

    /// One-way registry snapshot.
    pub fn publish_registry(&self, instance_id: &str, entities: Value) {
        let topic = format!("{}/{}/registry", self.namespace, self.topic_prefix);
        self.stage_publish(
            topic,
            json!({
                "instance_id": instance_id,
                "entities": entities,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
    }
}

impl TracePublisher for BrokerAdapter {
    fn publish_trace(&self, entity_id: &str, level: &str, event: Value) {
        let topic = format!(
            "{}/{}/trace/{}/{}",
            self.namespace, self.topic_prefix, entity_id, level
        );
        self.stage_publish(topic, event);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn command_envelope(topic: &str, payload: Value) -> Envelope {
        Envelope::new(payload, topic, Map::new())
    }

    #[test]
    fn parses_verb_and_endpoint_from_topic() {
        let adapter = BrokerAdapter::new("fluxmesh", "fm-control/v1");
        let env = command_envelope(
            "fluxmesh/fm-control/v1/GET/flows/orders",
            json!({"request_id": "r1", "reply_to_topic_prefix": "client/7"}),
        );
        let request = adapter.parse_command(&env).unwrap();
        assert_eq!(request.verb, "GET");
        assert_eq!(request.endpoint, "/flows/orders");
        assert_eq!(request.request_id, "r1");
        assert_eq!(request.reply_to_topic_prefix.as_deref(), Some("client/7"));
    }

    #[test]
    fn non_command_topics_are_ignored() {
        let adapter = BrokerAdapter::new("fluxmesh", "fm-control/v1");
        assert!(adapter
            .parse_command(&command_envelope("other/topic", json!({})))
            .is_none());
        assert!(adapter
            .parse_command(&command_envelope("fluxmesh/fm-control/v1/status/e", json!({})))
            .is_none());
    }

    #[test]
    fn request_id_is_generated_when_absent() {
        let adapter = BrokerAdapter::new("fluxmesh", "fm-control/v1");
        let env = command_envelope("fluxmesh/fm-control/v1/POST/trace", json!({}));
        let request = adapter.parse_command(&env).unwrap();
        assert!(!request.request_id.is_empty());
        assert_eq!(request.source, "unknown");
    }

    #[test]
    fn command_subscriptions_cover_the_verbs() {
        let adapter = BrokerAdapter::new("ns", "prefix/v1");
        let subscriptions = adapter.command_subscriptions();
        assert!(subscriptions.contains(&"ns/prefix/v1/GET/>".to_string()));
        assert_eq!(subscriptions.len(), 4);
    }

    #[tokio::test]
    async fn responses_are_staged_for_the_pump() {
        let adapter = BrokerAdapter::new("fluxmesh", "fm-control/v1");
        let request = CommandRequest {
            request_id: "r9".to_string(),
            verb: "GET".to_string(),
            endpoint: "/flows".to_string(),
            query_params: Map::new(),
            body: Value::Null,
            reply_to_topic_prefix: Some("client/xyz".to_string()),
            timestamp: None,
            source: "test".to_string(),
        };
        adapter.publish_response(&CommandResponse::ok(&request, json!([])));

        let (tx, mut rx) = mpsc::channel(4);
        adapter.attach_response_flow(tx, CancellationToken::new());

        let event = rx.recv().await.unwrap();
        let Event::Message(env) = event else {
            panic!("expected message event");
        };
        assert_eq!(
            env.previous()["topic"],
            json!("client/xyz/fm-control/v1/response/r9")
        );
        assert_eq!(env.previous()["payload"]["status_code"], json!(200));
    }
}
