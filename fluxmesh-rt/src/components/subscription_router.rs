//! `subscription_router`: dispatches each inbound envelope to exactly one
//! user component of a simplified app.
//!
//! Matching is first-match-wins in component configuration order. An
//! envelope no component subscribes to is discarded (and acknowledged);
//! holding it would stall the at-least-once window with no possible
//! consumer.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// Layer 3: Internal module imports
use super::registry::{ComponentBuild, ComponentRegistry};
use crate::broker::compile_subscription;
use crate::flow::{
    Component, ComponentContext, ComponentError, ComponentInfo, ComponentOutput, ConfigParameter,
    FlowEmitter, FlowError, NextLink,
};
use crate::message::{Envelope, Event};

fn info() -> ComponentInfo {
    ComponentInfo::new(
        "subscription_router",
        "Route each inbound message to the first component whose subscriptions match its topic",
    )
    .with_parameters(vec![ConfigParameter::required(
        "routing_components",
        "Names of the user components to route between, in match order",
    )])
}

struct Route {
    component_name: String,
    matchers: Vec<Regex>,
    sender: mpsc::Sender<Event>,
}

pub struct SubscriptionRouter {
    routes: Vec<Route>,
    cancel: CancellationToken,
}

impl SubscriptionRouter {
    pub fn from_build(build: &ComponentBuild<'_>) -> Result<Self, FlowError> {
        let names = build
            .node
            .config_value("routing_components")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                FlowError::Config("subscription_router requires 'routing_components'".into())
            })?;

        let mut routes = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_str().ok_or_else(|| {
                FlowError::Config("routing_components entries must be strings".into())
            })?;
            let peer = build
                .peers
                .iter()
                .find(|peer| peer.component_name == name)
                .ok_or_else(|| {
                    FlowError::Config(format!("router target {name} is not in this flow"))
                })?;
            routes.push(Route {
                component_name: name.to_string(),
                matchers: peer
                    .subscriptions
                    .iter()
                    .map(|s| compile_subscription(&s.topic))
                    .collect(),
                sender: peer.sender.clone(),
            });
        }

        Ok(Self {
            routes,
            cancel: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Component for SubscriptionRouter {
    fn kind(&self) -> &'static str {
        "subscription_router"
    }

    async fn on_start(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        self.cancel = ctx.cancel.clone();
        Ok(())
    }

    async fn process(
        &mut self,
        env: &mut Envelope,
        _input: Value,
    ) -> Result<ComponentOutput, ComponentError> {
        let topic = env.topic().to_string();
        for route in &self.routes {
            if route.matchers.iter().any(|matcher| matcher.is_match(&topic)) {
                tracing::debug!(topic = %topic, target = %route.component_name, "Routing message");
                let moved = env.take();
                let emitter =
                    FlowEmitter::new(NextLink::Channel(route.sender.clone()), self.cancel.clone());
                emitter.emit(Event::Message(moved)).await;
                return Ok(ComponentOutput::Consumed);
            }
        }

        tracing::warn!(topic = %topic, "No component subscription matches topic, discarding");
        Ok(ComponentOutput::Discard)
    }
}

pub(crate) fn register(registry: &ComponentRegistry) {
    registry.register(
        info(),
        Arc::new(|build| {
            Ok(Box::new(SubscriptionRouter::from_build(build)?) as Box<dyn Component>)
        }),
    );
}
