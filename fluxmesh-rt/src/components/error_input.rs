//! `error_input`: head of a dedicated error flow.
//!
//! Drains the process-shared error queue so a configured flow can publish
//! alerts. When no flow claims the queue, the connector's log drain
//! consumes it instead.

// Layer 1: Standard library imports
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::{json, Value};

// Layer 3: Internal module imports
use super::registry::{ComponentBuild, ComponentRegistry};
use crate::flow::{
    Component, ComponentContext, ComponentError, ComponentInfo, ComponentOutput, FlowError,
};
use crate::message::Envelope;
use crate::services::SharedServices;

fn info() -> ComponentInfo {
    ComponentInfo::new("error_input", "Feed the shared error queue into an error flow")
        .with_schemas(
            Value::Null,
            json!({
                "type": "object",
                "properties": {
                    "payload": {"type": "object"},
                    "topic": {"type": "string"},
                    "user_properties": {"type": "object"},
                },
            }),
        )
}

pub struct ErrorInput {
    services: Option<SharedServices>,
}

impl ErrorInput {
    pub fn from_build(build: &ComponentBuild<'_>) -> Result<Self, FlowError> {
        build
            .services
            .error_flow_claimed
            .store(true, Ordering::SeqCst);
        Ok(Self { services: None })
    }
}

#[async_trait]
impl Component for ErrorInput {
    fn kind(&self) -> &'static str {
        "error_input"
    }

    async fn on_start(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        self.services = Some(ctx.services.clone());
        Ok(())
    }

    fn is_source(&self) -> bool {
        true
    }

    async fn next_message(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Envelope>, ComponentError> {
        let Some(services) = &self.services else {
            return Ok(None);
        };
        Ok(services.error_queue.recv(timeout).await)
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
}

pub(crate) fn register(registry: &ComponentRegistry) {
    registry.register(
        info(),
        Arc::new(|build| Ok(Box::new(ErrorInput::from_build(build)?) as Box<dyn Component>)),
    );
}
