//! Per-component worker: one bounded input channel, one long-lived task.
//!
//! The worker loop waits on the input channel in one-second slices so the
//! process-wide shutdown signal is polled, applies input transforms,
//! derives the component input, invokes `process`, and routes the result
//! (emit downstream, discard with acks, or consume). Uncaught component
//! errors settle the envelope with the component's declared nack outcome
//! and divert an error envelope to the shared error queue; the worker
//! then backs off exponentially (1 s doubling to 60 s, reset on success).

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// Layer 3: Internal module imports
use super::component::{
    Component, ComponentContext, ComponentOutput, FlowEmitter, NextLink,
};
use super::config::ComponentNode;
use super::error::{ComponentError, FlowError};
use crate::message::{Envelope, Event, SourceExpression, Transforms};
use crate::services::{KeyValueStore, LockManager, MetricKey, SharedServices};

pub(crate) const QUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Exponential retry backoff for repeated component failures.
///
/// Starts at one second, doubles per failure, caps at sixty seconds, and
/// resets on the first success.
#[derive(Debug, Clone)]
pub struct RunnerBackoff {
    delay: Duration,
}

impl RunnerBackoff {
    const INITIAL: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(60);

    pub fn new() -> Self {
        Self { delay: Self::INITIAL }
    }

    pub fn current(&self) -> Duration {
        self.delay
    }

    pub fn grow(&mut self) {
        self.delay = (self.delay * 2).min(Self::MAX);
    }

    pub fn reset(&mut self) {
        self.delay = Self::INITIAL;
    }

    /// Sleep the current delay, cut short by shutdown.
    pub async fn wait(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.delay) => {}
        }
    }
}

impl Default for RunnerBackoff {
    fn default() -> Self {
        Self::new()
    }
}

struct WorkerContext {
    key: String,
    component_name: String,
    flow_name: String,
    instance_name: String,
    component_index: usize,
    transforms: Transforms,
    input_selection: SourceExpression,
    emitter: FlowEmitter,
    services: SharedServices,
    cancel: CancellationToken,
}

impl WorkerContext {
    /// Build the error envelope diverted to the shared error queue.
    fn divert_error(&self, error: &ComponentError, env: Option<&mut Envelope>) {
        tracing::error!(
            flow = %self.flow_name,
            component = %self.component_name,
            error = %error,
            "Component failed to process event"
        );

        let mut payload = json!({
            "error": {
                "text": error.to_string(),
                "exception": error.kind(),
            },
            "location": {
                "instance": self.instance_name,
                "flow": self.flow_name,
                "component": self.component_name,
                "component_index": self.component_index,
            },
        });

        let mut user_properties = serde_json::Map::new();
        if let Some(env) = env {
            payload["message"] = json!({
                "payload": env.payload(),
                "topic": env.topic(),
                "user_properties": env.user_properties(),
                "user_data": env.user_data(),
                "previous": env.previous(),
            });
            user_properties = env.user_properties().clone();
            // Settle anything left over; a no-op when the nack chain
            // already fired.
            env.call_acknowledgements();
        }

        let error_env = Envelope::new(payload, "", user_properties);
        self.services.error_queue.push(error_env);
    }

    async fn process_event(
        &self,
        component: &mut Box<dyn Component>,
        event: Event,
    ) -> Result<(), ComponentError> {
        match event {
            Event::Message(mut env) => {
                self.transforms.apply(&mut env);
                let input = env.get_data(&self.input_selection);

                if let Some(nack) = component.make_nack_callback() {
                    env.add_negative_acknowledgement(nack);
                }

                match component.process(&mut env, input).await {
                    Ok(ComponentOutput::Emit(output)) => {
                        env.set_previous(output);
                        if let Some(ack) = component.make_ack_callback() {
                            env.add_acknowledgement(ack);
                        }
                        tracing::debug!(
                            flow = %self.flow_name,
                            component = %self.component_name,
                            "Forwarding message"
                        );
                        self.emitter.emit(Event::Message(env)).await;
                        Ok(())
                    }
                    Ok(ComponentOutput::Discard) => {
                        env.call_acknowledgements();
                        Ok(())
                    }
                    Ok(ComponentOutput::Consumed) => Ok(()),
                    Err(error) => {
                        let outcome = component.nack_outcome_for(&error);
                        env.call_negative_acknowledgements(outcome);
                        self.divert_error(&error, Some(&mut env));
                        Err(error)
                    }
                }
            }
            Event::Timer(timer) => component.on_timer(timer).await.map_err(|error| {
                self.divert_error(&error, None);
                error
            }),
            Event::CacheExpiry(expiry) => {
                component.on_cache_expiry(expiry).await.map_err(|error| {
                    self.divert_error(&error, None);
                    error
                })
            }
        }
    }

    fn publish_monitoring(&self, component: &dyn Component) {
        if let Some(status) = component.connection_status() {
            self.services.monitoring.set_connection_status(&self.key, status);
        }
        for (metric, value) in component.metrics() {
            self.services.monitoring.record_metric(
                MetricKey::new(
                    self.flow_name.clone(),
                    self.component_name.clone(),
                    self.component_index,
                    metric,
                ),
                value,
            );
        }
    }
}

async fn worker_loop(
    mut component: Box<dyn Component>,
    input_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Event>>>,
    component_ctx: ComponentContext,
    ctx: WorkerContext,
) {
    if let Err(error) = component.on_start(&component_ctx).await {
        // Startup failures leave the component dead; everything queued
        // behind it will backpressure and surface operationally.
        ctx.divert_error(&error, None);
        tracing::error!(
            flow = %ctx.flow_name,
            component = %ctx.component_name,
            error = %error,
            "Component failed to start"
        );
        return;
    }

    let mut backoff = RunnerBackoff::new();

    while !ctx.cancel.is_cancelled() {
        let event = if component.is_source() {
            // Control events (timers, cache expiry) must not starve
            // behind the broker poll.
            let control = { input_rx.lock().await.try_recv().ok() };
            match control {
                Some(event) => Some(event),
                None => match component.next_message(QUEUE_TIMEOUT).await {
                    Ok(Some(env)) => Some(Event::Message(env)),
                    Ok(None) => None,
                    Err(error) => {
                        ctx.divert_error(&error, None);
                        backoff.wait(&ctx.cancel).await;
                        backoff.grow();
                        continue;
                    }
                },
            }
        } else {
            let mut guard = input_rx.lock().await;
            match tokio::time::timeout(QUEUE_TIMEOUT, guard.recv()).await {
                Ok(Some(event)) => Some(event),
                Ok(None) => break,
                Err(_) => None,
            }
        };

        ctx.publish_monitoring(component.as_ref());

        let Some(event) = event else { continue };
        tracing::trace!(
            flow = %ctx.flow_name,
            component = %ctx.component_name,
            kind = event.kind(),
            "Component received event"
        );
        if ctx.services.trace_file.is_enabled() {
            ctx.services.trace_file.write(format!(
                "[{}.{}.{}] Received {} event",
                ctx.instance_name,
                ctx.flow_name,
                ctx.component_name,
                event.kind()
            ));
        }

        match ctx.process_event(&mut component, event).await {
            Ok(()) => backoff.reset(),
            Err(_) => {
                backoff.wait(&ctx.cancel).await;
                backoff.grow();
            }
        }
    }

    component.on_stop().await;
    ctx.services.directory.deregister(&ctx.key);
}

/// Owns one component instance, its input channel, and its worker task.
pub struct ComponentRunner {
    component_name: String,
    flow_name: String,
    key: String,
    component_index: usize,
    input_tx: mpsc::Sender<Event>,
    input_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Event>>>,
    component: Option<Box<dyn Component>>,
    transforms: Transforms,
    input_selection: SourceExpression,
    next: NextLink,
    services: SharedServices,
    kv: Arc<KeyValueStore>,
    locks: Arc<LockManager>,
    request_response: Option<Arc<super::request_response::RequestResponseController>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Channel pair shared between sibling instances of one component.
pub(crate) type SharedInput = (
    mpsc::Sender<Event>,
    Arc<tokio::sync::Mutex<mpsc::Receiver<Event>>>,
);

pub(crate) fn make_input_channel(depth: usize) -> SharedInput {
    let (tx, rx) = mpsc::channel(depth);
    (tx, Arc::new(tokio::sync::Mutex::new(rx)))
}

impl ComponentRunner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        node: &ComponentNode,
        component: Box<dyn Component>,
        input: SharedInput,
        flow_name: &str,
        component_index: usize,
        instance_index: usize,
        services: SharedServices,
        kv: Arc<KeyValueStore>,
        locks: Arc<LockManager>,
        request_response: Option<Arc<super::request_response::RequestResponseController>>,
        cancel: CancellationToken,
    ) -> Result<Self, FlowError> {
        let transforms = Transforms::from_config(&node.input_transforms)?;
        let input_selection = match &node.input_selection {
            Some(raw) => raw.parse::<SourceExpression>()?,
            None => SourceExpression::previous(),
        };

        let key = format!(
            "{}.{}.{}.{}",
            services.instance_name, flow_name, node.component_name, instance_index
        );

        Ok(Self {
            component_name: node.component_name.clone(),
            flow_name: flow_name.to_string(),
            key,
            component_index,
            input_tx: input.0,
            input_rx: input.1,
            component: Some(component),
            transforms,
            input_selection,
            next: NextLink::Tail,
            services,
            kv,
            locks,
            request_response,
            cancel,
            handle: None,
        })
    }

    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn input_sender(&self) -> mpsc::Sender<Event> {
        self.input_tx.clone()
    }

    pub(crate) fn set_next(&mut self, next: NextLink) {
        self.next = next;
    }

    /// Spawn the worker task.
    pub fn run(&mut self) {
        let Some(component) = self.component.take() else {
            return;
        };

        self.services.directory.register(&self.key, self.input_tx.clone());

        let emitter = FlowEmitter::new(self.next.clone(), self.cancel.clone());
        let component_ctx = ComponentContext {
            key: self.key.clone(),
            component_name: self.component_name.clone(),
            flow_name: self.flow_name.clone(),
            instance_name: self.services.instance_name.clone(),
            services: self.services.clone(),
            kv: Arc::clone(&self.kv),
            locks: Arc::clone(&self.locks),
            emitter: emitter.clone(),
            cancel: self.cancel.clone(),
            request_response: self.request_response.clone(),
        };
        let worker_ctx = WorkerContext {
            key: self.key.clone(),
            component_name: self.component_name.clone(),
            flow_name: self.flow_name.clone(),
            instance_name: self.services.instance_name.clone(),
            component_index: self.component_index,
            transforms: self.transforms.clone(),
            input_selection: self.input_selection.clone(),
            emitter,
            services: self.services.clone(),
            cancel: self.cancel.clone(),
        };

        let input_rx = Arc::clone(&self.input_rx);
        self.handle = Some(tokio::spawn(worker_loop(
            component,
            input_rx,
            component_ctx,
            worker_ctx,
        )));
    }

    /// Wait for the worker to exit (after `stop`).
    pub async fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(
                    flow = %self.flow_name,
                    component = %self.component_name,
                    error = %e,
                    "Component worker ended abnormally"
                );
            }
        }
    }

    /// Drop everything still queued without processing it.
    pub fn drain_input(&self) {
        if let Ok(mut rx) = self.input_rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_cap_and_resets() {
        let mut backoff = RunnerBackoff::new();
        assert_eq!(backoff.current(), Duration::from_secs(1));
        backoff.grow();
        assert_eq!(backoff.current(), Duration::from_secs(2));
        for _ in 0..10 {
            backoff.grow();
        }
        assert_eq!(backoff.current(), Duration::from_secs(60));
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }
}
