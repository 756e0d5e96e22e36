//! Shared test components and helpers for the integration suites.

// Not every suite uses every helper.
#![allow(dead_code)]

// Layer 1: Standard library imports
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;

// Layer 3: Crate imports
use fluxmesh_rt::flow::{
    Component, ComponentContext, ComponentError, ComponentInfo, ComponentOutput,
};
use fluxmesh_rt::message::{AckCallback, Envelope, NackOutcome};
use fluxmesh_rt::services::SharedServices;

pub fn envelope(payload: Value, topic: &str) -> Envelope {
    Envelope::new(payload, topic, Map::new())
}

/// Records every input it sees as `(component_name, input)`, then emits
/// the input unchanged.
struct Capture {
    name: String,
    seen: Arc<Mutex<Vec<(String, Value)>>>,
}

#[async_trait]
impl Component for Capture {
    fn kind(&self) -> &'static str {
        "capture"
    }

    async fn on_start(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        self.name = ctx.component_name.clone();
        Ok(())
    }

    async fn process(
        &mut self,
        _env: &mut Envelope,
        input: Value,
    ) -> Result<ComponentOutput, ComponentError> {
        self.seen.lock().push((self.name.clone(), input.clone()));
        Ok(ComponentOutput::Emit(input))
    }
}

/// Register the `capture` test component; returns the shared record of
/// everything captured.
pub fn register_capture(services: &SharedServices) -> Arc<Mutex<Vec<(String, Value)>>> {
    let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let factory_seen = Arc::clone(&seen);
    services.components.register(
        ComponentInfo::new("capture", "Record inputs for assertions"),
        Arc::new(move |_build| {
            Ok(Box::new(Capture {
                name: String::new(),
                seen: Arc::clone(&factory_seen),
            }) as Box<dyn Component>)
        }),
    );
    seen
}

/// Fails whenever the input carries `{"fail": true}`; the configured
/// `nack_outcome` ("FAILED" | "REJECTED") decides the outcome.
struct Failer {
    outcome: NackOutcome,
}

#[async_trait]
impl Component for Failer {
    fn kind(&self) -> &'static str {
        "failer"
    }

    async fn process(
        &mut self,
        _env: &mut Envelope,
        input: Value,
    ) -> Result<ComponentOutput, ComponentError> {
        if input.get("fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(ComponentError::Message("induced failure".to_string()));
        }
        Ok(ComponentOutput::Emit(input))
    }

    fn nack_outcome_for(&self, _error: &ComponentError) -> NackOutcome {
        self.outcome
    }
}

pub fn register_failer(services: &SharedServices) {
    services.components.register(
        ComponentInfo::new("failer", "Fail on {\"fail\": true} inputs"),
        Arc::new(|build| {
            let outcome = match build.node.config_str("nack_outcome") {
                Some("FAILED") => NackOutcome::Failed,
                _ => NackOutcome::Rejected,
            };
            Ok(Box::new(Failer { outcome }) as Box<dyn Component>)
        }),
    );
}

/// Echoes `{payload, topic, user_properties}` inputs back out on the
/// configured `echo_topic`, stamping `echo_timestamp`, and counts the
/// acknowledgements of the envelopes it emitted.
struct Echo {
    echo_topic: String,
    acks: Arc<AtomicUsize>,
}

#[async_trait]
impl Component for Echo {
    fn kind(&self) -> &'static str {
        "echo"
    }

    async fn process(
        &mut self,
        _env: &mut Envelope,
        input: Value,
    ) -> Result<ComponentOutput, ComponentError> {
        let mut user_properties = input
            .get("user_properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        user_properties.insert(
            "echo_timestamp".to_string(),
            json!(Utc::now().timestamp_millis()),
        );
        Ok(ComponentOutput::Emit(json!({
            "payload": input.get("payload").cloned().unwrap_or(Value::Null),
            "topic": self.echo_topic,
            "user_properties": user_properties,
        })))
    }

    fn make_ack_callback(&mut self) -> Option<AckCallback> {
        let acks = Arc::clone(&self.acks);
        Some(Box::new(move || {
            acks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }))
    }
}

pub fn register_echo(services: &SharedServices) -> Arc<AtomicUsize> {
    let acks = Arc::new(AtomicUsize::new(0));
    let factory_acks = Arc::clone(&acks);
    services.components.register(
        ComponentInfo::new("echo", "Echo inputs to a configured topic"),
        Arc::new(move |build| {
            let echo_topic = build
                .node
                .config_str("echo_topic")
                .unwrap_or("echo/out")
                .to_string();
            Ok(Box::new(Echo {
                echo_topic,
                acks: Arc::clone(&factory_acks),
            }) as Box<dyn Component>)
        }),
    );
    acks
}

/// Blocks on a semaphore permit before emitting; lets tests hold a flow
/// stalled to observe backpressure.
struct Gate {
    permits: Arc<Semaphore>,
}

#[async_trait]
impl Component for Gate {
    fn kind(&self) -> &'static str {
        "gate"
    }

    async fn process(
        &mut self,
        _env: &mut Envelope,
        input: Value,
    ) -> Result<ComponentOutput, ComponentError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ComponentError::Message("gate closed".to_string()))?;
        permit.forget();
        Ok(ComponentOutput::Emit(input))
    }
}

/// Arms a short repeating timer on start and records every timer event
/// it receives.
struct TimerProbe {
    ticks: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Component for TimerProbe {
    fn kind(&self) -> &'static str {
        "timer_probe"
    }

    async fn on_start(&mut self, ctx: &ComponentContext) -> Result<(), ComponentError> {
        ctx.add_timer(
            "probe",
            std::time::Duration::from_millis(10),
            Some(std::time::Duration::from_millis(10)),
            Some(json!({"kind": "probe"})),
        );
        Ok(())
    }

    async fn process(
        &mut self,
        _env: &mut Envelope,
        input: Value,
    ) -> Result<ComponentOutput, ComponentError> {
        Ok(ComponentOutput::Emit(input))
    }

    async fn on_timer(
        &mut self,
        timer: fluxmesh_rt::message::TimerEvent,
    ) -> Result<(), ComponentError> {
        self.ticks.lock().push(timer.timer_id);
        Ok(())
    }
}

pub fn register_timer_probe(services: &SharedServices) -> Arc<Mutex<Vec<String>>> {
    let ticks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let factory_ticks = Arc::clone(&ticks);
    services.components.register(
        ComponentInfo::new("timer_probe", "Record timer deliveries"),
        Arc::new(move |_build| {
            Ok(Box::new(TimerProbe {
                ticks: Arc::clone(&factory_ticks),
            }) as Box<dyn Component>)
        }),
    );
    ticks
}

pub fn register_gate(services: &SharedServices) -> Arc<Semaphore> {
    let permits = Arc::new(Semaphore::new(0));
    let factory_permits = Arc::clone(&permits);
    services.components.register(
        ComponentInfo::new("gate", "Hold messages until permits are released"),
        Arc::new(move |_build| {
            Ok(Box::new(Gate {
                permits: Arc::clone(&factory_permits),
            }) as Box<dyn Component>)
        }),
    );
    permits
}
