//! A flow: an ordered chain of component runners wired head-to-tail.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// Layer 3: Internal module imports
use super::component::{FlowSink, NextLink};
use super::config::{FlowConfig, NextOverride};
use super::error::FlowError;
use super::runner::{make_input_channel, ComponentRunner, SharedInput};
use crate::components::{ComponentBuild, PeerChannel};
use crate::message::{Envelope, Event};
use crate::services::{KeyValueStore, LockManager, SharedServices};

/// A running (or runnable) chain of component runners.
///
/// Construction wires each component group to its successor's bounded
/// input channel; multiple instances of one component (siblings) share a
/// single input channel and pull from it competitively.
pub struct Flow {
    name: String,
    runners: Vec<ComponentRunner>,
    /// Parallel to `runners`: the component-group index of each runner.
    group_of: Vec<usize>,
    head_tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl Flow {
    /// Build a flow from its parsed config.
    ///
    /// `sink` replaces the tail: when present, message events reaching
    /// the end of the chain are enqueued there instead of firing their
    /// ack chain directly.
    pub fn build(
        config: &FlowConfig,
        services: &SharedServices,
        sink: Option<Arc<dyn FlowSink>>,
    ) -> Result<Self, FlowError> {
        if config.components.is_empty() {
            return Err(FlowError::EmptyFlow(config.name.clone()));
        }

        let cancel = services.cancel.child_token();
        let kv = Arc::new(KeyValueStore::new());
        let locks = Arc::new(LockManager::new());

        // Validate kinds and apply declared parameter defaults up front.
        let mut nodes = config.components.clone();
        for node in &mut nodes {
            let info = services.components.info(&node.kind).ok_or_else(|| {
                FlowError::UnknownComponentKind {
                    flow: config.name.clone(),
                    kind: node.kind.clone(),
                }
            })?;
            node.apply_parameter_defaults(&info)?;
        }

        // Phase 1: one input channel per component group.
        let channels: Vec<SharedInput> = nodes
            .iter()
            .map(|node| make_input_channel(node.queue_max_depth))
            .collect();

        // Phase 2: peer table (the subscription router dispatches through it).
        let peers: Vec<PeerChannel> = nodes
            .iter()
            .zip(&channels)
            .map(|(node, channel)| PeerChannel {
                component_name: node.component_name.clone(),
                subscriptions: node.subscriptions.clone(),
                sender: channel.0.clone(),
            })
            .collect();

        // Phase 3: build components and runners (siblings share a channel).
        let mut runners = Vec::new();
        let mut group_of = Vec::new();
        for (index, node) in nodes.iter().enumerate() {
            // Per-component request/response controller, shared between
            // sibling instances.
            let request_response = match &node.broker_request_response {
                Some(rr_config)
                    if rr_config
                        .get("enabled")
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(false) =>
                {
                    let broker_config = rr_config.get("broker_config").ok_or_else(|| {
                        FlowError::Config(format!(
                            "component {}: broker_request_response requires broker_config",
                            node.component_name
                        ))
                    })?;
                    let expiry = rr_config
                        .get("request_expiry_ms")
                        .and_then(serde_json::Value::as_u64)
                        .unwrap_or(super::request_response::RequestResponseController::DEFAULT_REQUEST_EXPIRY_MS);
                    Some(Arc::new(super::request_response::RequestResponseController::new(
                        broker_config,
                        expiry,
                        services,
                    )?))
                }
                _ => None,
            };

            for instance in 0..node.num_instances {
                let build = ComponentBuild {
                    node,
                    flow_name: &config.name,
                    services,
                    peers: &peers,
                };
                let component = services.components.build(&build)?;
                let runner = ComponentRunner::new(
                    node,
                    component,
                    (channels[index].0.clone(), Arc::clone(&channels[index].1)),
                    &config.name,
                    index,
                    instance,
                    services.clone(),
                    Arc::clone(&kv),
                    Arc::clone(&locks),
                    request_response.clone(),
                    cancel.clone(),
                )?;
                runners.push(runner);
                group_of.push(index);
            }
        }

        // Phase 4: wire successors.
        let tail_link = match sink {
            Some(sink) => NextLink::Sink(sink),
            None => NextLink::Tail,
        };
        for (runner, group) in runners.iter_mut().zip(&group_of) {
            let link = match nodes[*group].next_override {
                Some(NextOverride::Component(target)) => {
                    let channel = channels.get(target).ok_or_else(|| {
                        FlowError::Config(format!(
                            "flow {}: next override out of range", config.name
                        ))
                    })?;
                    NextLink::Channel(channel.0.clone())
                }
                Some(NextOverride::Tail) => tail_link.clone(),
                None => match channels.get(*group + 1) {
                    Some(channel) => NextLink::Channel(channel.0.clone()),
                    None => tail_link.clone(),
                },
            };
            runner.set_next(link);
        }

        Ok(Self {
            name: config.name.clone(),
            runners,
            group_of,
            head_tx: channels[0].0.clone(),
            cancel,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The head runner's input channel.
    pub fn input_sender(&self) -> mpsc::Sender<Event> {
        self.head_tx.clone()
    }

    /// Input channel of a named component (first instance wins).
    pub fn component_input(&self, component_name: &str) -> Option<mpsc::Sender<Event>> {
        self.runners
            .iter()
            .find(|runner| runner.component_name() == component_name)
            .map(|runner| runner.input_sender())
    }

    /// Name of the component at a group index.
    pub fn component_name_at(&self, group: usize) -> Option<&str> {
        self.group_of
            .iter()
            .position(|g| *g == group)
            .map(|i| self.runners[i].component_name())
    }

    /// Component names in configuration order (one entry per group).
    pub fn component_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut seen_group = None;
        for (runner, group) in self.runners.iter().zip(&self.group_of) {
            if seen_group != Some(*group) {
                names.push(runner.component_name().to_string());
                seen_group = Some(*group);
            }
        }
        names
    }

    /// Start every runner's worker task.
    pub fn run(&mut self) {
        tracing::info!(flow = %self.name, components = self.runners.len(), "Starting flow");
        for runner in &mut self.runners {
            runner.run();
        }
    }

    /// Post a message envelope into the head of the flow.
    pub async fn send_message(&self, env: Envelope) -> bool {
        let emitter = super::component::FlowEmitter::new(
            NextLink::Channel(self.head_tx.clone()),
            self.cancel.clone(),
        );
        emitter.emit(Event::Message(env)).await
    }

    /// Signal every runner to exit after its current envelope.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for all workers to exit.
    pub async fn wait(&mut self) {
        for runner in &mut self.runners {
            runner.wait().await;
        }
    }

    /// Drain queued events, stop runners in order, join their workers.
    pub async fn cleanup(&mut self) {
        tracing::debug!(flow = %self.name, "Cleaning up flow");
        if let Some(head) = self.runners.first() {
            head.drain_input();
        }
        self.stop();
        self.wait().await;
        for runner in &self.runners {
            runner.drain_input();
        }
    }
}
