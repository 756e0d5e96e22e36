//! The App: standard (`flows:`) and simplified (`broker:` +
//! `components:`) forms.
//!
//! A simplified app synthesizes one implicit flow:
//!
//! ```text
//! [BrokerInput?] -> [SubscriptionRouter?] -> user components -> [BrokerOutput?]
//! ```
//!
//! - `BrokerInput` appears iff `broker.input_enabled`, bound to
//!   `broker.queue_name` with the union of the user components'
//!   subscriptions.
//! - `SubscriptionRouter` appears iff input is enabled and there are two
//!   or more user components; it dispatches each envelope to exactly one
//!   of them (first configuration-order match). With a router present,
//!   every user component forwards straight to the stage after the user
//!   block.
//! - `BrokerOutput` appears iff `broker.output_enabled` and consumes
//!   `{payload, topic, user_properties}`.

// Layer 1: Standard library imports
use std::collections::HashMap;

// Layer 2: Third-party crate imports
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

// Layer 3: Internal module imports
use crate::config::deep_merge;
use crate::flow::{
    Flow, FlowConfig, FlowError, NextOverride, RequestResponseController,
};
use crate::message::{Envelope, Event};
use crate::services::SharedServices;

/// Broker config keys forwarded into the implicit input/output components.
const FORWARDED_BROKER_KEYS: &[&str] = &[
    "broker_type",
    "dev_mode",
    "broker_url",
    "broker_username",
    "broker_password",
    "reconnection_strategy",
    "retry_interval",
    "retry_count",
    "retry_wait",
    "payload_encoding",
    "payload_format",
    "temporary_queue",
    "share_connection",
];

const APP_REQUEST_EXPIRY_MS: u64 = 300_000;

pub struct App {
    name: String,
    app_info: Value,
    app_config: Value,
    flows: Vec<Flow>,
    flow_inputs: HashMap<String, mpsc::Sender<Event>>,
    services: SharedServices,
    request_response: Option<RequestResponseController>,
    /// Implicit BrokerOutput input channel, for [`App::send_message`].
    broker_output_input: Option<mpsc::Sender<Event>>,
    output_enabled: bool,
}

impl App {
    /// Build an app from its (already merged) configuration.
    ///
    /// `code_config` is an optional code-defined config map; the
    /// declarative `app_info` takes precedence in a deep merge.
    pub fn new(
        app_info: &Value,
        code_config: Option<&Value>,
        app_index: usize,
        services: &SharedServices,
    ) -> Result<Self, FlowError> {
        let merged = match code_config {
            Some(code) => deep_merge(code, app_info),
            None => app_info.clone(),
        };

        let name = merged
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("app_{app_index}"));

        let broker = merged.get("broker").cloned().unwrap_or(Value::Null);
        let request_response = if broker
            .get("request_reply_enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            tracing::info!(app = %name, "Request-reply enabled, initializing controller");
            let expiry = broker
                .get("request_expiry_ms")
                .and_then(Value::as_u64)
                .unwrap_or(APP_REQUEST_EXPIRY_MS);
            Some(RequestResponseController::new(&broker, expiry, services)?)
        } else {
            None
        };

        let mut app = Self {
            name,
            app_config: merged.get("app_config").cloned().unwrap_or(Value::Null),
            app_info: merged,
            flows: Vec::new(),
            flow_inputs: HashMap::new(),
            services: services.clone(),
            request_response,
            broker_output_input: None,
            output_enabled: broker
                .get("output_enabled")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };
        app.create_flows()?;
        Ok(app)
    }

    fn is_simplified(&self) -> bool {
        self.app_info.get("broker").is_some()
            && self.app_info.get("components").is_some()
            && self.app_info.get("flows").is_none()
    }

    fn create_flows(&mut self) -> Result<(), FlowError> {
        if self.is_simplified() {
            tracing::info!(app = %self.name, "Creating simplified app flow");
            let config = self.simplified_flow_config()?;
            let flow = Flow::build(&config, &self.services, None)?;
            self.flow_inputs
                .insert(flow.name().to_string(), flow.input_sender());
            self.broker_output_input =
                flow.component_input(&format!("{}_broker_output", self.name));
            self.flows.push(flow);
            return Ok(());
        }

        let flow_values = self
            .app_info
            .get("flows")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for flow_value in &flow_values {
            let config = FlowConfig::from_value(flow_value)?;
            let num_instances = flow_value
                .get("num_instances")
                .and_then(Value::as_u64)
                .map(|n| n.max(1))
                .unwrap_or(1);
            for instance in 0..num_instances {
                tracing::info!(app = %self.name, flow = %config.name, instance, "Creating flow");
                let flow = Flow::build(&config, &self.services, None)?;
                self.flow_inputs
                    .entry(flow.name().to_string())
                    .or_insert_with(|| flow.input_sender());
                self.flows.push(flow);
            }
        }
        Ok(())
    }

    /// Build the implicit flow config for the simplified form.
    fn simplified_flow_config(&self) -> Result<FlowConfig, FlowError> {
        let broker = self
            .app_info
            .get("broker")
            .and_then(Value::as_object)
            .ok_or_else(|| FlowError::Config(format!("app {}: broker must be a mapping", self.name)))?;
        let user_components = self
            .app_info
            .get("components")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                FlowError::Config(format!("app {}: components must be a list", self.name))
            })?;

        let input_enabled = broker
            .get("input_enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let output_enabled = self.output_enabled;

        let mut forwarded = Map::new();
        for key in FORWARDED_BROKER_KEYS {
            if let Some(value) = broker.get(*key) {
                forwarded.insert((*key).to_string(), value.clone());
            }
        }

        let mut nodes: Vec<Value> = Vec::new();

        if input_enabled {
            let all_subscriptions: Vec<Value> = user_components
                .iter()
                .flat_map(|component| {
                    component
                        .get("subscriptions")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default()
                })
                .collect();
            if all_subscriptions.is_empty() {
                tracing::warn!(
                    app = %self.name,
                    "input_enabled is true but no component declares subscriptions"
                );
            }

            let mut input_config = forwarded.clone();
            input_config.insert(
                "broker_queue_name".to_string(),
                broker.get("queue_name").cloned().unwrap_or(Value::Null),
            );
            input_config.insert(
                "broker_subscriptions".to_string(),
                Value::Array(all_subscriptions),
            );
            nodes.push(json!({
                "component_name": format!("{}_broker_input", self.name),
                "component_module": "broker_input",
                "component_config": Value::Object(input_config),
            }));
        }

        let has_router = input_enabled && user_components.len() > 1;
        if has_router {
            let names: Vec<Value> = user_components
                .iter()
                .map(|component| {
                    component
                        .get("component_name")
                        .or_else(|| component.get("name"))
                        .cloned()
                        .unwrap_or(Value::Null)
                })
                .collect();
            nodes.push(json!({
                "component_name": format!("{}_router", self.name),
                "component_module": "subscription_router",
                "component_config": {"routing_components": names},
            }));
        }

        let user_start = nodes.len();
        nodes.extend(user_components.iter().cloned());
        let user_end = nodes.len();

        if output_enabled {
            let mut output_config = forwarded;
            output_config.insert(
                "propagate_acknowledgements".to_string(),
                broker
                    .get("propagate_acknowledgements")
                    .cloned()
                    .unwrap_or(json!(true)),
            );
            nodes.push(json!({
                "component_name": format!("{}_broker_output", self.name),
                "component_module": "broker_output",
                "component_config": Value::Object(output_config),
            }));
        }

        let flow_value = json!({
            "name": format!("{}_implicit_flow", self.name),
            "components": nodes,
        });
        let mut config = FlowConfig::from_value(&flow_value)?;

        // With a router dispatching into the user block, user components
        // must not feed each other; each forwards to the stage after the
        // block.
        if has_router {
            let after_users = if output_enabled {
                NextOverride::Component(user_end)
            } else {
                NextOverride::Tail
            };
            for node in &mut config.components[user_start..user_end] {
                node.next_override = Some(after_users);
            }
        }

        Ok(config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// App-level `app_config` lookup.
    pub fn get_config(&self, key: &str) -> Option<&Value> {
        self.app_config.get(key)
    }

    pub fn request_response(&self) -> Option<&RequestResponseController> {
        self.request_response.as_ref()
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn flow_input(&self, flow_name: &str) -> Option<mpsc::Sender<Event>> {
        self.flow_inputs.get(flow_name).cloned()
    }

    /// Start every flow.
    pub fn run(&mut self) {
        for flow in &mut self.flows {
            flow.run();
        }
    }

    /// Post an envelope to a named flow's head channel.
    pub async fn send_message_to_flow(&self, flow_name: &str, env: Envelope) -> bool {
        match self.flows.iter().find(|flow| flow.name() == flow_name) {
            Some(flow) => flow.send_message(env).await,
            None => {
                tracing::error!(app = %self.name, flow = %flow_name, "Can't send message: flow not found");
                false
            }
        }
    }

    /// Post directly into the implicit BrokerOutput, bypassing the chain.
    ///
    /// A no-op (with a warning) when output is disabled.
    pub async fn send_message(
        &self,
        payload: Value,
        topic: &str,
        user_properties: Option<Map<String, Value>>,
    ) {
        if !self.output_enabled {
            tracing::warn!(
                app = %self.name,
                "send_message called but output_enabled is false; message discarded"
            );
            return;
        }
        let Some(output) = &self.broker_output_input else {
            tracing::error!(app = %self.name, "No implicit broker_output component found");
            return;
        };

        let mut env = Envelope::empty();
        env.set_previous(json!({
            "payload": payload,
            "topic": topic,
            "user_properties": user_properties.unwrap_or_default(),
        }));
        if output.send(Event::Message(env)).await.is_err() {
            tracing::error!(app = %self.name, "Failed to enqueue message to broker_output");
        }
    }

    /// Wait for every flow's workers to finish.
    pub async fn wait(&mut self) {
        for flow in &mut self.flows {
            flow.wait().await;
        }
    }

    /// Clean up the request/response controller and all flows.
    pub async fn cleanup(&mut self) {
        tracing::info!(app = %self.name, "Cleaning up app");
        if let Some(mut controller) = self.request_response.take() {
            controller.stop();
            controller.cleanup().await;
        }
        for flow in &mut self.flows {
            flow.cleanup().await;
        }
        self.flows.clear();
        self.flow_inputs.clear();
        self.broker_output_input = None;
    }
}
