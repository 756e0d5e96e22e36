//! The connector's own managed entity: runtime introspection and live
//! trace reconfiguration endpoints.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::RwLock;
use serde_json::{json, Value};

// Layer 3: Internal module imports
use super::registry::{Endpoint, EndpointMethod, EntityDescriptor, HandlerArgs};
use super::tracing::TracingSystem;

/// Live topology snapshot the handlers read:
/// `{"apps": [...], "flows": [{"name", "app", "components": [...]}]}`.
pub type TopologySnapshot = Arc<RwLock<Value>>;

/// Build the connector entity descriptor.
///
/// Registered once the apps exist, so the topology snapshot is complete
/// when the first request can arrive.
pub fn connector_entity(
    instance_name: &str,
    version: &str,
    topology: TopologySnapshot,
    tracing: Arc<TracingSystem>,
) -> EntityDescriptor {
    let instance = instance_name.to_string();
    let release = version.to_string();

    let info_topology = Arc::clone(&topology);
    let info = EndpointMethod::new(
        "Connector instance information",
        Arc::new(move |_args: &HandlerArgs| {
            let topology = info_topology.read();
            Ok(json!({
                "instance_name": instance,
                "version": release,
                "apps": topology.get("apps").cloned().unwrap_or(json!([])),
            }))
        }),
    );

    let apps_topology = Arc::clone(&topology);
    let apps = EndpointMethod::new(
        "List apps",
        Arc::new(move |_args: &HandlerArgs| {
            Ok(apps_topology.read().get("apps").cloned().unwrap_or(json!([])))
        }),
    );

    let flows_topology = Arc::clone(&topology);
    let flows = EndpointMethod::new(
        "List flows",
        Arc::new(move |_args: &HandlerArgs| {
            let topology = flows_topology.read();
            let names: Vec<Value> = topology
                .get("flows")
                .and_then(Value::as_array)
                .map(|flows| {
                    flows
                        .iter()
                        .filter_map(|flow| flow.get("name").cloned())
                        .collect()
                })
                .unwrap_or_default();
            Ok(Value::Array(names))
        }),
    );

    let flow_topology = Arc::clone(&topology);
    let flow_detail = EndpointMethod::new(
        "Flow detail",
        Arc::new(move |args: &HandlerArgs| {
            let flow_id = args
                .path_params
                .get("flow_id")
                .cloned()
                .unwrap_or_default();
            let topology = flow_topology.read();
            topology
                .get("flows")
                .and_then(Value::as_array)
                .and_then(|flows| {
                    flows
                        .iter()
                        .find(|flow| flow.get("name").and_then(Value::as_str) == Some(&flow_id))
                })
                .cloned()
                .ok_or_else(|| format!("flow {flow_id} not found"))
        }),
    );

    let trace_get_system = Arc::clone(&tracing);
    let trace_get = EndpointMethod::new(
        "Current trace configuration",
        Arc::new(move |_args: &HandlerArgs| Ok(trace_get_system.configuration())),
    );

    let trace_put_system = tracing;
    let trace_put = EndpointMethod::new(
        "Update trace configuration",
        Arc::new(move |args: &HandlerArgs| {
            if trace_put_system.update_configuration(&args.body) {
                Ok(trace_put_system.configuration())
            } else {
                Err("invalid trace configuration".to_string())
            }
        }),
    )
    .with_body_schema(json!({"type": "object"}));

    EntityDescriptor::new("connector", "connector", instance_name)
        .with_description("Fluxmesh connector instance")
        .with_endpoints(vec![
            Endpoint::new("/").method("GET", info),
            Endpoint::new("/apps").method("GET", apps),
            Endpoint::new("/flows").method("GET", flows),
            Endpoint::new("/flows/{flow_id}").method("GET", flow_detail),
            Endpoint::new("/trace").method("GET", trace_get).method("PUT", trace_put),
        ])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::control::registry::EntityRegistry;

    fn registry_with_connector() -> (EntityRegistry, TopologySnapshot) {
        let topology: TopologySnapshot = Arc::new(RwLock::new(json!({
            "apps": ["app1"],
            "flows": [
                {"name": "flow1", "app": "app1", "components": ["a", "b"]},
            ],
        })));
        let registry = EntityRegistry::new();
        let entity = connector_entity(
            "test-instance",
            "0.1.0",
            Arc::clone(&topology),
            Arc::new(TracingSystem::new()),
        );
        assert!(registry.register_entity(entity));
        (registry, topology)
    }

    fn call(registry: &EntityRegistry, path: &str, verb: &str) -> Result<Value, String> {
        let matched = registry.find_endpoint_handler(path, verb).unwrap();
        let method = matched.method.unwrap();
        (method.handler)(&HandlerArgs {
            path_params: matched.path_params,
            query_params: Default::default(),
            body: Value::Null,
            context: Value::Null,
        })
    }

    #[test]
    fn flows_listing_and_detail() {
        let (registry, _topology) = registry_with_connector();
        assert_eq!(call(&registry, "/flows", "GET").unwrap(), json!(["flow1"]));

        let detail = call(&registry, "/flows/flow1", "GET").unwrap();
        assert_eq!(detail["components"], json!(["a", "b"]));

        assert!(call(&registry, "/flows/ghost", "GET").is_err());
    }

    #[test]
    fn trace_endpoints_read_and_write() {
        let (registry, _topology) = registry_with_connector();
        let config = call(&registry, "/trace", "GET").unwrap();
        assert_eq!(config["default_level"], json!("INFO"));
    }
}
