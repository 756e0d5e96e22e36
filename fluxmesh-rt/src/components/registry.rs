//! Component factory registry.
//!
//! Configuration refers to components by `component_module` name; the
//! registry resolves those names to factory functions. Built-ins are
//! pre-registered; embedders add their own kinds with
//! [`ComponentRegistry::register`] before the connector starts.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use tokio::sync::mpsc;

// Layer 3: Internal module imports
use crate::broker::Subscription;
use crate::flow::{Component, ComponentInfo, ComponentNode, FlowError};
use crate::message::Event;
use crate::services::SharedServices;

/// Another component of the same flow, addressable by the router.
#[derive(Clone)]
pub struct PeerChannel {
    pub component_name: String,
    pub subscriptions: Vec<Subscription>,
    pub sender: mpsc::Sender<Event>,
}

/// Everything a factory may consult while constructing a component.
pub struct ComponentBuild<'a> {
    pub node: &'a ComponentNode,
    pub flow_name: &'a str,
    pub services: &'a SharedServices,
    /// Input channels of every component in the flow, in configuration
    /// order.
    pub peers: &'a [PeerChannel],
}

/// Builds one component instance from its configuration.
pub type ComponentFactory =
    Arc<dyn Fn(&ComponentBuild<'_>) -> Result<Box<dyn Component>, FlowError> + Send + Sync>;

struct RegistryEntry {
    info: ComponentInfo,
    factory: ComponentFactory,
}

/// Name → factory map for every known component kind.
pub struct ComponentRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl ComponentRegistry {
    /// Empty registry; prefer [`with_builtins`](Self::with_builtins).
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in broker components.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        super::broker_input::register(&registry);
        super::broker_output::register(&registry);
        super::subscription_router::register(&registry);
        super::broker_request_response::register(&registry);
        super::error_input::register(&registry);
        super::pass_through::register(&registry);
        registry
    }

    /// Register (or replace) a component kind.
    pub fn register(&self, info: ComponentInfo, factory: ComponentFactory) {
        self.entries
            .insert(info.kind.to_string(), RegistryEntry { info, factory });
    }

    /// Declared info for a kind, if registered.
    pub fn info(&self, kind: &str) -> Option<ComponentInfo> {
        self.entries.get(kind).map(|entry| entry.value().info.clone())
    }

    /// Construct a component for `build.node`.
    pub fn build(&self, build: &ComponentBuild<'_>) -> Result<Box<dyn Component>, FlowError> {
        let factory = self
            .entries
            .get(&build.node.kind)
            .map(|entry| Arc::clone(&entry.value().factory))
            .ok_or_else(|| FlowError::UnknownComponentKind {
                flow: build.flow_name.to_string(),
                kind: build.node.kind.clone(),
            })?;
        factory(build)
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = ComponentRegistry::with_builtins();
        for kind in [
            "broker_input",
            "broker_output",
            "subscription_router",
            "broker_request_response",
            "error_input",
            "pass_through",
        ] {
            assert!(registry.info(kind).is_some(), "missing builtin {kind}");
        }
        assert!(registry.info("no_such_component").is_none());
    }
}
