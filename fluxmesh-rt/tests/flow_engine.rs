//! Flow engine integration tests: ack propagation, nack outcomes, error
//! diversion, ordering and backpressure.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use fluxmesh_rt::flow::{Flow, FlowConfig};
use fluxmesh_rt::message::NackOutcome;
use fluxmesh_rt::services::SharedServices;

use common::{envelope, register_capture, register_failer, register_gate, register_timer_probe};

fn flow_config(value: Value) -> FlowConfig {
    FlowConfig::from_value(&value).expect("valid flow config")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn envelope_is_acked_exactly_once_after_tail_completion() {
    let services = SharedServices::for_testing();
    let seen = register_capture(&services);

    let config = flow_config(json!({
        "name": "ack_flow",
        "components": [
            {"component_name": "head", "component_module": "capture",
             "input_selection": "input.payload"},
            {"component_name": "tail", "component_module": "capture"},
        ],
    }));
    let mut flow = Flow::build(&config, &services, None).expect("flow builds");
    flow.run();

    let acks = Arc::new(AtomicUsize::new(0));
    let nacks = Arc::new(AtomicUsize::new(0));

    let mut env = envelope(json!({"v": 1}), "t/1");
    let ack_count = Arc::clone(&acks);
    env.add_acknowledgement(Box::new(move || {
        ack_count.fetch_add(1, Ordering::SeqCst);
    }));
    let nack_count = Arc::clone(&nacks);
    env.add_negative_acknowledgement(Box::new(move |_| {
        nack_count.fetch_add(1, Ordering::SeqCst);
    }));

    assert!(flow.send_message(env).await);
    settle().await;

    assert_eq!(acks.load(Ordering::SeqCst), 1, "ack fires exactly once");
    assert_eq!(nacks.load(Ordering::SeqCst), 0, "no nack on success");
    assert_eq!(seen.lock().len(), 2, "both components processed the message");

    flow.cleanup().await;
}

#[tokio::test]
async fn failing_component_nacks_with_declared_outcome_and_diverts() {
    let services = SharedServices::for_testing();
    let seen = register_capture(&services);
    register_failer(&services);

    let config = flow_config(json!({
        "name": "failing_flow",
        "components": [
            {"component_name": "first", "component_module": "capture",
             "input_selection": "input.payload"},
            {"component_name": "breaker", "component_module": "failer",
             "component_config": {"nack_outcome": "FAILED"}},
            {"component_name": "last", "component_module": "capture"},
        ],
    }));
    let mut flow = Flow::build(&config, &services, None).expect("flow builds");
    flow.run();

    let outcome: Arc<Mutex<Option<NackOutcome>>> = Arc::new(Mutex::new(None));
    let mut env = envelope(json!({"fail": true}), "t/fail");
    let recorded = Arc::clone(&outcome);
    env.add_negative_acknowledgement(Box::new(move |o| {
        *recorded.lock() = Some(o);
    }));

    assert!(flow.send_message(env).await);
    settle().await;

    // The broker-facing nack carries the component's declared outcome.
    assert_eq!(*outcome.lock(), Some(NackOutcome::Failed));

    // One error envelope with the original payload and the failing
    // component's location.
    let error_env = services
        .error_queue
        .recv(Duration::from_secs(1))
        .await
        .expect("error envelope diverted");
    let payload = error_env.payload();
    assert_eq!(payload["location"]["component"], json!("breaker"));
    assert_eq!(payload["message"]["payload"], json!({"fail": true}));
    assert_eq!(payload["error"]["exception"], json!("Message"));

    // The message passed the first component but never the third.
    let names: Vec<String> = seen.lock().iter().map(|(name, _)| name.clone()).collect();
    assert_eq!(names, vec!["first".to_string()]);

    flow.cleanup().await;
}

#[tokio::test]
async fn discarded_inputs_are_not_forwarded() {
    let services = SharedServices::for_testing();
    let seen = register_capture(&services);
    register_failer(&services);

    // failer with default outcome also exercises REJECTED.
    let config = flow_config(json!({
        "name": "rejecting_flow",
        "components": [
            {"component_name": "breaker", "component_module": "failer",
             "input_selection": "input.payload"},
            {"component_name": "after", "component_module": "capture"},
        ],
    }));
    let mut flow = Flow::build(&config, &services, None).expect("flow builds");
    flow.run();

    let outcome: Arc<Mutex<Option<NackOutcome>>> = Arc::new(Mutex::new(None));
    let mut env = envelope(json!({"fail": true}), "t/x");
    let recorded = Arc::clone(&outcome);
    env.add_negative_acknowledgement(Box::new(move |o| {
        *recorded.lock() = Some(o);
    }));
    assert!(flow.send_message(env).await);
    settle().await;

    assert_eq!(*outcome.lock(), Some(NackOutcome::Rejected));
    assert!(seen.lock().is_empty());

    flow.cleanup().await;
}

#[tokio::test]
async fn outputs_preserve_input_order_within_a_runner() {
    let services = SharedServices::for_testing();
    let seen = register_capture(&services);

    let config = flow_config(json!({
        "name": "ordered_flow",
        "components": [
            {"component_name": "only", "component_module": "capture",
             "input_selection": "input.payload"},
        ],
    }));
    let mut flow = Flow::build(&config, &services, None).expect("flow builds");
    flow.run();

    for i in 0..50 {
        assert!(flow.send_message(envelope(json!({"seq": i}), "t/seq")).await);
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    let order: Vec<i64> = seen
        .lock()
        .iter()
        .map(|(_, value)| value["seq"].as_i64().unwrap_or(-1))
        .collect();
    assert_eq!(order, (0..50).collect::<Vec<i64>>());

    flow.cleanup().await;
}

#[tokio::test]
async fn bounded_channels_backpressure_upstream() {
    let services = SharedServices::for_testing();
    let permits = register_gate(&services);
    let seen = register_capture(&services);

    let config = flow_config(json!({
        "name": "pressured_flow",
        "components": [
            {"component_name": "gate", "component_module": "gate",
             "input_selection": "input.payload",
             "component_queue_max_depth": 2},
            {"component_name": "sink", "component_module": "capture"},
        ],
    }));
    let mut flow = Flow::build(&config, &services, None).expect("flow builds");
    flow.run();

    // Let the worker pull one message into processing, then fill the
    // bounded queue: capacity 2 + 1 in flight.
    let input = flow.input_sender();
    let mut accepted = 0;
    for i in 0..10 {
        use fluxmesh_rt::message::Event;
        if input
            .try_send(Event::Message(envelope(json!({"n": i}), "t")))
            .is_ok()
        {
            accepted += 1;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(
        accepted <= 3,
        "in-flight envelopes exceeded N*K+1: accepted {accepted}"
    );

    // Release the gate; everything accepted flows through.
    permits.add_permits(accepted);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(seen.lock().len(), accepted);

    flow.cleanup().await;
}

#[tokio::test]
async fn timer_events_reach_the_component_hook() {
    let services = SharedServices::for_testing();
    let ticks = register_timer_probe(&services);

    let config = flow_config(json!({
        "name": "timed_flow",
        "components": [
            {"component_name": "probe", "component_module": "timer_probe"},
        ],
    }));
    let mut flow = Flow::build(&config, &services, None).expect("flow builds");
    flow.run();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let observed = ticks.lock().clone();
    assert!(observed.len() >= 2, "repeating timer fired: {observed:?}");
    assert!(observed.iter().all(|id| id == "probe"));

    flow.cleanup().await;
}

#[tokio::test]
async fn error_input_component_drains_the_shared_error_queue() {
    let services = SharedServices::for_testing();
    let seen = register_capture(&services);
    register_failer(&services);

    // The error flow claims the queue...
    let error_flow_config = flow_config(json!({
        "name": "error_flow",
        "components": [
            {"component_name": "errors", "component_module": "error_input"},
            {"component_name": "alerts", "component_module": "capture"},
        ],
    }));
    let mut error_flow =
        Flow::build(&error_flow_config, &services, None).expect("error flow builds");
    error_flow.run();
    assert!(services
        .error_flow_claimed
        .load(std::sync::atomic::Ordering::SeqCst));

    // ...and a failing flow feeds it.
    let failing_config = flow_config(json!({
        "name": "failing_flow",
        "components": [
            {"component_name": "breaker", "component_module": "failer",
             "input_selection": "input.payload"},
        ],
    }));
    let mut failing_flow = Flow::build(&failing_config, &services, None).expect("flow builds");
    failing_flow.run();

    assert!(failing_flow
        .send_message(envelope(json!({"fail": true}), "t/boom"))
        .await);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let captured = seen.lock();
    let alert = captured
        .iter()
        .find(|(name, _)| name == "alerts")
        .map(|(_, value)| value.clone())
        .expect("alert captured from error flow");
    assert_eq!(alert["payload"]["location"]["component"], json!("breaker"));

    drop(captured);
    failing_flow.cleanup().await;
    error_flow.cleanup().await;
}

#[tokio::test]
async fn sibling_instances_share_one_input_queue() {
    let services = SharedServices::for_testing();
    let seen = register_capture(&services);

    let config = flow_config(json!({
        "name": "sibling_flow",
        "components": [
            {"component_name": "worker", "component_module": "capture",
             "input_selection": "input.payload", "num_instances": 3},
        ],
    }));
    let mut flow = Flow::build(&config, &services, None).expect("flow builds");
    flow.run();

    for i in 0..12 {
        assert!(flow.send_message(envelope(json!({"n": i}), "t")).await);
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Every message is processed exactly once across the siblings.
    let mut values: Vec<i64> = seen
        .lock()
        .iter()
        .map(|(_, value)| value["n"].as_i64().unwrap_or(-1))
        .collect();
    values.sort_unstable();
    assert_eq!(values, (0..12).collect::<Vec<i64>>());

    flow.cleanup().await;
}
