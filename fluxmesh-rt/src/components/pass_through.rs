//! `pass_through`: forward the derived input unchanged.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use serde_json::Value;

// Layer 3: Internal module imports
use super::registry::{ComponentBuild, ComponentRegistry};
use crate::flow::{Component, ComponentError, ComponentInfo, ComponentOutput, FlowError};
use crate::message::Envelope;

fn info() -> ComponentInfo {
    ComponentInfo::new("pass_through", "Forward the selected input unchanged")
}

pub struct PassThrough;

impl PassThrough {
    pub fn from_build(_build: &ComponentBuild<'_>) -> Result<Self, FlowError> {
        Ok(Self)
    }
}

#[async_trait]
impl Component for PassThrough {
    fn kind(&self) -> &'static str {
        "pass_through"
    }

    async fn process(
        &mut self,
        _env: &mut Envelope,
        input: Value,
    ) -> Result<ComponentOutput, ComponentError> {
        Ok(ComponentOutput::Emit(input))
    }
}

pub(crate) fn register(registry: &ComponentRegistry) {
    registry.register(
        info(),
        Arc::new(|build| Ok(Box::new(PassThrough::from_build(build)?) as Box<dyn Component>)),
    );
}
