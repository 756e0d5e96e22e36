//! The component contract.
//!
//! A component is the unit of user logic in a flow: it receives an
//! envelope plus its derived input, and returns what should happen to the
//! message. Everything else (queuing, acking, retries, error diversion)
//! belongs to the runner.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// Layer 3: Internal module imports
use super::error::ComponentError;
use crate::broker::ConnectionStatus;
use crate::message::{
    AckCallback, CacheExpiryEvent, Envelope, Event, NackCallback, NackOutcome, TimerEvent,
};
use crate::services::{KeyValueStore, LockManager, SharedServices};

/// One declared config parameter of a component kind.
#[derive(Debug, Clone)]
pub struct ConfigParameter {
    pub name: &'static str,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
}

impl ConfigParameter {
    pub fn required(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            required: true,
            default: None,
            description,
        }
    }

    pub fn optional(name: &'static str, default: Option<Value>, description: &'static str) -> Self {
        Self {
            name,
            required: false,
            default,
            description,
        }
    }
}

/// Static description of a component kind: the name it is configured
/// under, its parameters, and its advisory I/O schemas.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub kind: &'static str,
    pub description: &'static str,
    pub config_parameters: Vec<ConfigParameter>,
    pub input_schema: Value,
    pub output_schema: Value,
}

impl ComponentInfo {
    pub fn new(kind: &'static str, description: &'static str) -> Self {
        Self {
            kind,
            description,
            config_parameters: Vec::new(),
            input_schema: Value::Null,
            output_schema: Value::Null,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<ConfigParameter>) -> Self {
        self.config_parameters = parameters;
        self
    }

    pub fn with_schemas(mut self, input: Value, output: Value) -> Self {
        self.input_schema = input;
        self.output_schema = output;
        self
    }
}

/// What a component decided about the current message.
#[derive(Debug)]
pub enum ComponentOutput {
    /// Set `previous` to the value and hand the envelope to the next
    /// stage (or fire the ack chain at the tail).
    Emit(Value),
    /// Drop the message, acknowledging everything upstream.
    Discard,
    /// The component took ownership (batching, side-channel send);
    /// nothing moves downstream and nothing is acknowledged yet.
    Consumed,
}

/// Where a runner forwards its output.
#[derive(Clone)]
pub enum NextLink {
    /// The next runner's input channel.
    Channel(mpsc::Sender<Event>),
    /// An in-memory sink owned by a controller (request/response,
    /// command/control).
    Sink(Arc<dyn FlowSink>),
    /// End of the chain: message events fire their ack chain here.
    Tail,
}

/// In-memory tail for internal flows.
pub trait FlowSink: Send + Sync {
    fn enqueue(&self, event: Event);
}

/// Cancellable, backpressure-aware handle for pushing events downstream.
#[derive(Clone)]
pub struct FlowEmitter {
    link: NextLink,
    cancel: CancellationToken,
}

impl FlowEmitter {
    pub fn new(link: NextLink, cancel: CancellationToken) -> Self {
        Self { link, cancel }
    }

    pub fn tail(cancel: CancellationToken) -> Self {
        Self::new(NextLink::Tail, cancel)
    }

    /// Push an event downstream.
    ///
    /// Blocks on a full channel, retrying in one-second slices so the
    /// shutdown signal is polled. Returns `false` if shutdown interrupted
    /// the enqueue or the channel closed.
    pub async fn emit(&self, event: Event) -> bool {
        match &self.link {
            NextLink::Tail => {
                if let Event::Message(mut env) = event {
                    env.call_acknowledgements();
                }
                true
            }
            NextLink::Sink(sink) => {
                sink.enqueue(event);
                true
            }
            NextLink::Channel(sender) => {
                let mut event = event;
                loop {
                    if self.cancel.is_cancelled() {
                        return false;
                    }
                    match sender.send_timeout(event, Duration::from_secs(1)).await {
                        Ok(()) => return true,
                        Err(mpsc::error::SendTimeoutError::Timeout(recovered)) => {
                            // Backpressure: downstream is full. Recover the
                            // event and poll the shutdown signal again.
                            event = recovered;
                        }
                        Err(mpsc::error::SendTimeoutError::Closed(recovered)) => {
                            tracing::warn!(
                                "Downstream channel closed, dropping {} event",
                                recovered.kind()
                            );
                            return false;
                        }
                    }
                }
            }
        }
    }
}

/// Identity and shared-service access handed to a component at start.
#[derive(Clone)]
pub struct ComponentContext {
    /// Directory key: `instance.flow.component.index`.
    pub key: String,
    pub component_name: String,
    pub flow_name: String,
    pub instance_name: String,
    pub services: SharedServices,
    /// Flow-scoped named values.
    pub kv: Arc<KeyValueStore>,
    /// Flow-scoped named locks.
    pub locks: Arc<LockManager>,
    /// Pushes events to this component's successor.
    pub emitter: FlowEmitter,
    pub cancel: CancellationToken,
    /// Present when the component config enables `broker_request_response`.
    pub request_response: Option<Arc<super::request_response::RequestResponseController>>,
}

impl ComponentContext {
    /// Arm a timer delivered to this component's input channel.
    pub fn add_timer(
        &self,
        timer_id: &str,
        delay: Duration,
        interval: Option<Duration>,
        payload: Option<Value>,
    ) {
        self.services
            .timers
            .add_timer(&self.key, timer_id, delay, interval, payload);
    }

    pub fn cancel_timer(&self, timer_id: &str) {
        self.services.timers.cancel_timer(&self.key, timer_id);
    }
}

/// The component capability set.
///
/// Only `process` is mandatory. The default hooks describe a pure
/// transform stage: no timers, no broker connection, rejected-on-error.
#[async_trait]
pub trait Component: Send + Sync {
    /// Component kind name, as used in configuration.
    fn kind(&self) -> &'static str;

    /// Handle one message. `input` is the value derived by the configured
    /// `input_selection` expression (default `previous`).
    async fn process(
        &mut self,
        env: &mut Envelope,
        input: Value,
    ) -> Result<ComponentOutput, ComponentError>;

    /// Called once before the worker loop starts.
    async fn on_start(&mut self, _ctx: &ComponentContext) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Called once after the worker loop exits.
    async fn on_stop(&mut self) {}

    /// Timer hook; see [`ComponentContext::add_timer`].
    async fn on_timer(&mut self, _timer: TimerEvent) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Cache-expiry hook.
    async fn on_cache_expiry(&mut self, _expiry: CacheExpiryEvent) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Ack callback registered on every envelope this component emits.
    /// Called after `process` returns for the message in question.
    fn make_ack_callback(&mut self) -> Option<AckCallback> {
        None
    }

    /// Nack callback registered on every envelope before `process`.
    fn make_nack_callback(&mut self) -> Option<NackCallback> {
        None
    }

    /// Map a processing error to the broker-facing nack outcome.
    fn nack_outcome_for(&self, _error: &ComponentError) -> NackOutcome {
        NackOutcome::Rejected
    }

    /// Whether this component pulls its own messages (broker input)
    /// instead of reading the flow channel exclusively.
    fn is_source(&self) -> bool {
        false
    }

    /// Source poll; only called when [`is_source`](Component::is_source)
    /// is true. A `None` within the timeout is benign.
    async fn next_message(
        &mut self,
        _timeout: Duration,
    ) -> Result<Option<Envelope>, ComponentError> {
        Ok(None)
    }

    /// Point-in-time metrics, keyed by metric name.
    fn metrics(&self) -> Vec<(String, Value)> {
        Vec::new()
    }

    /// Connection state, for broker-attached components.
    fn connection_status(&self) -> Option<ConnectionStatus> {
        None
    }
}
