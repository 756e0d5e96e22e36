//! Command/control plane end-to-end tests over the dev broker.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use serde_json::{json, Map, Value};

use fluxmesh_rt::broker::{Broker, DevBroker, QueueDurability, Subscription};
use fluxmesh_rt::connector::Connector;
use fluxmesh_rt::message::{decode_payload, PayloadEncoding, PayloadFormat};

fn connector_config() -> Value {
    json!({
        "instance_name": "ctl-test",
        "apps": [{
            "name": "noop_app",
            "flows": [{
                "name": "noop_flow",
                "components": [{
                    "component_name": "idle",
                    "component_module": "pass_through",
                }],
            }],
        }],
        "command_control": {
            "enabled": true,
            "broker": {
                "broker_type": "dev",
                "broker_url": "dev://control",
            },
        },
    })
}

struct ControlClient {
    broker: DevBroker,
}

impl ControlClient {
    async fn attach(connector: &Connector) -> Self {
        let broker = DevBroker::new(
            connector
                .services()
                .dev_broker_hub
                .state_for("dev://control"),
        );
        broker.connect().await.expect("connect");
        broker
            .bind_queue(
                "client-q",
                &[Subscription::new("client/test/fm-control/v1/response/>")],
                QueueDurability::Temporary,
            )
            .await
            .expect("bind");
        // Give the command flow a moment to bind its queue.
        tokio::time::sleep(Duration::from_millis(100)).await;
        Self { broker }
    }

    async fn request(&self, verb: &str, endpoint: &str, request_id: &str, body: Value) -> (String, Value) {
        let topic = format!("fluxmesh/fm-control/v1/{verb}{endpoint}");
        let payload = json!({
            "request_id": request_id,
            "reply_to_topic_prefix": "client/test",
            "body": body,
        });
        self.broker
            .send(
                &topic,
                serde_json::to_vec(&payload).expect("encode"),
                &Map::new(),
                None,
            )
            .await
            .expect("publish request");

        let response = self
            .broker
            .receive("client-q", Duration::from_secs(3))
            .await
            .expect("receive")
            .expect("response arrives");
        let decoded =
            decode_payload(&response.payload, PayloadEncoding::Utf8, PayloadFormat::Json)
                .expect("decode");
        (response.topic, decoded)
    }
}

#[tokio::test]
async fn unknown_endpoint_returns_404_on_the_reply_topic() {
    let mut connector = Connector::new(connector_config()).expect("connector builds");
    connector.run().await.expect("connector starts");

    let client = ControlClient::attach(&connector).await;
    let (topic, response) = client
        .request("GET", "/missing", "req-404", Value::Null)
        .await;

    assert_eq!(topic, "client/test/fm-control/v1/response/req-404");
    assert_eq!(response["status_code"], json!(404));
    assert_eq!(
        response["body"],
        json!({"error": "No handler found for GET /missing"})
    );
    assert_eq!(response["request_id"], json!("req-404"));

    connector.cleanup().await;
}

#[tokio::test]
async fn connector_entity_serves_flow_introspection() {
    let mut connector = Connector::new(connector_config()).expect("connector builds");
    connector.run().await.expect("connector starts");

    let client = ControlClient::attach(&connector).await;

    let (_, flows) = client.request("GET", "/flows", "req-flows", Value::Null).await;
    assert_eq!(flows["status_code"], json!(200));
    assert_eq!(flows["body"], json!(["noop_flow"]));

    let (_, detail) = client
        .request("GET", "/flows/noop_flow", "req-detail", Value::Null)
        .await;
    assert_eq!(detail["status_code"], json!(200));
    assert_eq!(detail["body"]["app"], json!("noop_app"));
    assert_eq!(detail["body"]["components"], json!(["idle"]));

    connector.cleanup().await;
}

#[tokio::test]
async fn trace_configuration_is_live_reconfigurable() {
    let mut connector = Connector::new(connector_config()).expect("connector builds");
    connector.run().await.expect("connector starts");

    let client = ControlClient::attach(&connector).await;

    let (_, before) = client.request("GET", "/trace", "req-t1", Value::Null).await;
    assert_eq!(before["status_code"], json!(200));
    assert_eq!(before["body"]["default_level"], json!("INFO"));

    let (_, updated) = client
        .request(
            "PUT",
            "/trace",
            "req-t2",
            json!({"default_level": "DEBUG", "entity_levels": {"noop_flow": "ERROR"}}),
        )
        .await;
    assert_eq!(updated["status_code"], json!(200));
    assert_eq!(updated["body"]["default_level"], json!("DEBUG"));
    assert_eq!(updated["body"]["entity_levels"]["noop_flow"], json!("ERROR"));

    let (_, after) = client.request("GET", "/trace", "req-t3", Value::Null).await;
    assert_eq!(after["body"]["default_level"], json!("DEBUG"));

    connector.cleanup().await;
}

#[tokio::test]
async fn trace_events_are_published_to_the_trace_topic() {
    let mut connector = Connector::new(connector_config()).expect("connector builds");
    connector.run().await.expect("connector starts");

    // Subscribe to the service's own trace stream, then trigger a traced
    // request.
    let observer = DevBroker::new(
        connector
            .services()
            .dev_broker_hub
            .state_for("dev://control"),
    );
    observer.connect().await.expect("connect");
    observer
        .bind_queue(
            "trace-observer",
            &[Subscription::new("fluxmesh/fm-control/v1/trace/>")],
            QueueDurability::Temporary,
        )
        .await
        .expect("bind");

    let client = ControlClient::attach(&connector).await;
    client.request("GET", "/flows", "req-traced", Value::Null).await;

    let mut stages = Vec::new();
    while let Some(message) = observer
        .receive("trace-observer", Duration::from_millis(500))
        .await
        .expect("receive")
    {
        let event =
            decode_payload(&message.payload, PayloadEncoding::Utf8, PayloadFormat::Json)
                .expect("decode");
        if event["request_id"] == json!("req-traced") {
            stages.push(event["stage"].as_str().unwrap_or("?").to_string());
        }
    }
    assert!(stages.contains(&"start".to_string()));
    assert!(stages.contains(&"completion".to_string()));

    connector.cleanup().await;
}
