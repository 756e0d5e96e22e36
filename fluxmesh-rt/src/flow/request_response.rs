//! Synchronous request/response over the asynchronous broker.
//!
//! The controller owns an internal single-component flow (the
//! `broker_request_response` component) whose tail is an in-memory sink
//! feeding the controller's response channel. Callers get an iterator-like
//! [`ResponseStream`]; in streaming mode each response is tested against a
//! completion expression to decide `is_last`.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

// Layer 3: Internal module imports
use super::component::FlowSink;
use super::config::FlowConfig;
use super::error::{FlowError, RequestError};
use super::flow::Flow;
use crate::message::{Envelope, Event, SourceExpression};
use crate::services::SharedServices;

/// Python-style truthiness for completion expressions.
pub fn value_is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(list) => !list.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// The in-memory tail of the controller's internal flow.
struct ControllerSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl FlowSink for ControllerSink {
    fn enqueue(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

/// Synchronous RPC idiom on top of publish/subscribe.
pub struct RequestResponseController {
    flow: Flow,
    responses: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>>,
    request_expiry: Duration,
}

impl RequestResponseController {
    pub const DEFAULT_REQUEST_EXPIRY_MS: u64 = 30_000;

    /// Build and start the internal request/response flow.
    ///
    /// `broker_config` is the `broker_config` block of the component (or
    /// app) configuration; `request_expiry_ms` bounds every request made
    /// through this controller.
    pub fn new(
        broker_config: &Value,
        request_expiry_ms: u64,
        services: &SharedServices,
    ) -> Result<Self, FlowError> {
        let mut component_config = broker_config
            .as_object()
            .cloned()
            .unwrap_or_else(Map::new);
        component_config.insert("request_expiry_ms".to_string(), json!(request_expiry_ms));

        let flow_value = json!({
            "name": "_internal_broker_request_response_flow",
            "components": [{
                "component_name": "_internal_broker_request_response",
                "component_module": "broker_request_response",
                "component_config": Value::Object(component_config),
            }],
        });
        let config = FlowConfig::from_value(&flow_value)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn FlowSink> = Arc::new(ControllerSink { tx });
        let mut flow = Flow::build(&config, services, Some(sink))?;
        flow.run();

        Ok(Self {
            flow,
            responses: Arc::new(tokio::sync::Mutex::new(rx)),
            request_expiry: Duration::from_millis(request_expiry_ms),
        })
    }

    /// Issue a request; the returned stream yields `(envelope, is_last)`.
    ///
    /// Non-streaming requests yield exactly one `(envelope, true)`.
    /// Streaming requests yield until `completion_expression` evaluates
    /// truthy on a response. Either way the expiry budget starts at the
    /// enqueue instant.
    pub async fn request(
        &self,
        mut env: Envelope,
        stream: bool,
        completion_expression: Option<SourceExpression>,
    ) -> Result<ResponseStream, RequestError> {
        env.set_previous(json!({
            "payload": env.payload().clone(),
            "user_properties": env.user_properties().clone(),
            "topic": env.topic(),
            "stream": stream,
            "completion_expression": completion_expression
                .as_ref()
                .map(SourceExpression::to_string),
        }));

        let deadline = Instant::now() + self.request_expiry;
        if !self.flow.send_message(env).await {
            return Err(RequestError::Closed);
        }

        Ok(ResponseStream {
            responses: Arc::clone(&self.responses),
            deadline,
            expiry: self.request_expiry,
            stream,
            completion_expression,
            done: false,
        })
    }

    /// Non-streaming convenience: exactly one response or a timeout.
    pub async fn request_single(&self, env: Envelope) -> Result<Envelope, RequestError> {
        let mut responses = self.request(env, false, None).await?;
        match responses.next().await? {
            Some((response, _)) => Ok(response),
            None => Err(RequestError::Timeout(self.request_expiry)),
        }
    }

    pub fn stop(&self) {
        self.flow.stop();
    }

    pub async fn cleanup(&mut self) {
        self.flow.cleanup().await;
    }
}

/// Iterator over correlated responses for one request.
pub struct ResponseStream {
    responses: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>>,
    deadline: Instant,
    expiry: Duration,
    stream: bool,
    completion_expression: Option<SourceExpression>,
    done: bool,
}

impl ResponseStream {
    /// Next `(envelope, is_last)` pair.
    ///
    /// Returns `Ok(None)` after the last message; raises
    /// [`RequestError::Timeout`] when the expiry budget (measured from
    /// the enqueue instant) runs out.
    pub async fn next(&mut self) -> Result<Option<(Envelope, bool)>, RequestError> {
        if self.done {
            return Ok(None);
        }

        loop {
            let Some(remaining) = self.deadline.checked_duration_since(Instant::now()) else {
                return Err(RequestError::Timeout(self.expiry));
            };

            let event = {
                let mut rx = self.responses.lock().await;
                tokio::time::timeout(remaining, rx.recv()).await
            };

            match event {
                Err(_) => return Err(RequestError::Timeout(self.expiry)),
                Ok(None) => return Err(RequestError::Closed),
                Ok(Some(Event::Message(env))) => {
                    if !self.stream {
                        self.done = true;
                        return Ok(Some((env, true)));
                    }
                    let is_last = self
                        .completion_expression
                        .as_ref()
                        .map(|expr| value_is_truthy(&env.get_data(expr)))
                        .unwrap_or(false);
                    if is_last {
                        self.done = true;
                    }
                    return Ok(Some((env, is_last)));
                }
                Ok(Some(_)) => continue,
            }
        }
    }
}
