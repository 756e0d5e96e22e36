//! Central command/control service.
//!
//! Owns the entity registry, the request router, the tracing system and
//! the broker adapter, plus two internal flows: one receiving commands
//! from a broker queue, one publishing responses and notifications. The
//! service is constructed before any user app so those apps can register
//! entities during their own construction.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// Layer 3: Internal module imports
use super::adapter::{BrokerAdapter, DEFAULT_NAMESPACE, DEFAULT_TOPIC_PREFIX};
use super::registry::{EntityDescriptor, EntityRegistry};
use super::router::{CommandRequest, CommandResponse, RequestRouter};
use super::tracing::{TraceLevel, TracePublisher, TracingSystem};
use crate::flow::{Flow, FlowConfig, FlowError, FlowSink};
use crate::message::{Envelope, Event};
use crate::services::SharedServices;

/// Tail of the command flow: hands received command envelopes to the
/// service task.
struct CommandSink {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl FlowSink for CommandSink {
    fn enqueue(&self, event: Event) {
        if let Event::Message(env) = event {
            let _ = self.tx.send(env);
        }
    }
}

pub struct CommandControlService {
    instance_id: String,
    registry: Arc<EntityRegistry>,
    router: RequestRouter,
    tracing: Arc<TracingSystem>,
    adapter: Arc<BrokerAdapter>,
    flows: parking_lot::Mutex<Vec<Flow>>,
    cancel: CancellationToken,
}

impl CommandControlService {
    /// Build the service and its two internal flows from the
    /// `command_control` config block.
    pub fn new(config: &Value, services: &SharedServices) -> Result<Arc<Self>, FlowError> {
        let namespace = config
            .get("namespace")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_NAMESPACE);
        let topic_prefix = config
            .get("topic_prefix")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_TOPIC_PREFIX);
        let broker = config
            .get("broker")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| {
                FlowError::Config("command_control requires a 'broker' section".to_string())
            })?;

        let instance_id = Uuid::new_v4().to_string();
        let adapter = Arc::new(BrokerAdapter::new(namespace, topic_prefix));
        let tracing_system = Arc::new(TracingSystem::new());
        tracing_system.set_publisher(Arc::clone(&adapter) as Arc<dyn TracePublisher>);

        let registry = Arc::new(EntityRegistry::new());
        let router = RequestRouter::new(Arc::clone(&registry));
        let cancel = services.cancel.child_token();

        // Command flow: broker_input bound to the verb subscriptions,
        // tailed by the command sink.
        let queue_name = broker
            .get("queue_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{namespace}-control-{instance_id}"));
        let subscriptions: Vec<Value> = adapter
            .command_subscriptions()
            .into_iter()
            .map(|topic| json!({"topic": topic}))
            .collect();

        let mut input_config = broker.clone();
        input_config.insert("broker_queue_name".to_string(), json!(queue_name));
        input_config.insert("broker_subscriptions".to_string(), Value::Array(subscriptions));
        input_config.insert("temporary_queue".to_string(), json!(true));
        let command_flow_config = FlowConfig::from_value(&json!({
            "name": "_internal_command_control_input",
            "components": [{
                "component_name": "_command_control_input",
                "component_module": "broker_input",
                "component_config": Value::Object(input_config),
            }],
        }))?;

        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn FlowSink> = Arc::new(CommandSink { tx: command_tx });
        let mut command_flow = Flow::build(&command_flow_config, services, Some(sink))?;

        // Response flow: a lone broker_output publishing staged records.
        let response_flow_config = FlowConfig::from_value(&json!({
            "name": "_internal_command_control_output",
            "components": [{
                "component_name": "_command_control_output",
                "component_module": "broker_output",
                "component_config": Value::Object(broker),
            }],
        }))?;
        let mut response_flow = Flow::build(&response_flow_config, services, None)?;

        adapter.attach_response_flow(response_flow.input_sender(), cancel.clone());
        command_flow.run();
        response_flow.run();

        let service = Arc::new(Self {
            instance_id,
            registry,
            router,
            tracing: tracing_system,
            adapter,
            flows: parking_lot::Mutex::new(vec![command_flow, response_flow]),
            cancel: cancel.clone(),
        });

        // Service task: drain the command sink, route, respond.
        let worker = Arc::clone(&service);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    env = command_rx.recv() => {
                        let Some(mut env) = env else { return };
                        worker.handle_command_envelope(&mut env);
                        env.call_acknowledgements();
                    }
                }
            }
        });

        tracing::info!(instance_id = %service.instance_id, "Command control service initialized");
        Ok(service)
    }

    fn handle_command_envelope(&self, env: &mut Envelope) {
        let Some(request) = self.adapter.parse_command(env) else {
            return;
        };
        let response = self.handle_request(&request);
        self.adapter.publish_response(&response);
    }

    /// Route one command request inside a trace context.
    pub fn handle_request(&self, request: &CommandRequest) -> CommandResponse {
        let mut ctx = self.tracing.trace_context(
            "command_control",
            "service",
            TraceLevel::Info,
            &format!("{} {}", request.verb, request.endpoint),
            Some(&request.request_id),
            Some(json!({"endpoint": request.endpoint, "source": request.source})),
        );

        let response = self.router.route_request(request);
        if response.status_code >= 500 {
            ctx.fail("HandlerError", &response.status_message);
        }
        ctx.progress(Some(json!({"status_code": response.status_code})));
        response
    }

    /// Register a managed entity and publish the updated registry.
    pub fn register_entity(&self, descriptor: EntityDescriptor) -> bool {
        let entity_id = descriptor.entity_id.clone();
        let entity_type = descriptor.entity_type.clone();
        let entity_name = descriptor.entity_name.clone();
        if !self.registry.register_entity(descriptor) {
            tracing::warn!(entity = %entity_id, "Failed to register entity");
            return false;
        }
        tracing::info!(entity = %entity_id, name = %entity_name, "Entity registered");
        self.publish_registry();
        self.tracing.emit_trace(
            "command_control",
            "service",
            TraceLevel::Info,
            "register_entity",
            "completion",
            None,
            Some(json!({
                "registered_entity": entity_id,
                "entity_type": entity_type,
                "entity_name": entity_name,
            })),
            None,
            None,
        );
        true
    }

    pub fn deregister_entity(&self, entity_id: &str) -> bool {
        let removed = self.registry.deregister_entity(entity_id);
        if removed {
            self.publish_registry();
        }
        removed
    }

    pub fn registry(&self) -> Arc<EntityRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn tracing(&self) -> Arc<TracingSystem> {
        Arc::clone(&self.tracing)
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn publish_status(&self, entity_id: &str, entity_type: &str, status: &str, details: Value) {
        self.adapter.publish_status(entity_id, entity_type, status, details);
    }

    pub fn publish_metrics(&self, entity_id: &str, entity_type: &str, metrics: Value) {
        self.adapter.publish_metrics(entity_id, entity_type, metrics);
    }

    pub fn publish_registry(&self) {
        self.adapter
            .publish_registry(&self.instance_id, self.registry.registry_summary());
    }

    /// Stop the internal flows and the service task.
    pub async fn cleanup(&self) {
        self.cancel.cancel();
        let mut flows = {
            let mut guard = self.flows.lock();
            std::mem::take(&mut *guard)
        };
        for flow in &mut flows {
            flow.cleanup().await;
        }
    }
}
