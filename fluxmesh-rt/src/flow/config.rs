//! Parsed flow and component configuration nodes.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use serde_json::{Map, Value};

// Layer 3: Internal module imports
use super::component::ComponentInfo;
use super::error::FlowError;
use crate::broker::Subscription;

pub const DEFAULT_QUEUE_MAX_DEPTH: usize = 5;

/// Explicit successor override, used when a flow is not strictly linear
/// (simplified apps with a subscription router).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextOverride {
    /// Forward to the component at this index.
    Component(usize),
    /// Forward to the flow's tail (sink or ack).
    Tail,
}

/// One component entry of a flow's `components:` list, parsed.
#[derive(Debug, Clone)]
pub struct ComponentNode {
    pub component_name: String,
    /// The `component_module` / `component_class` name resolved through
    /// the component registry.
    pub kind: String,
    pub component_config: Value,
    pub input_selection: Option<String>,
    pub input_transforms: Vec<Value>,
    pub queue_max_depth: usize,
    pub num_instances: usize,
    pub subscriptions: Vec<Subscription>,
    pub broker_request_response: Option<Value>,
    pub next_override: Option<NextOverride>,
    /// The raw config node, for `get_config` fallbacks.
    pub raw: Value,
}

impl ComponentNode {
    pub fn from_value(value: &Value, flow_name: &str) -> Result<Self, FlowError> {
        let object = value.as_object().ok_or_else(|| {
            FlowError::Config(format!("component in flow {flow_name} must be a mapping"))
        })?;

        let component_name = object
            .get("component_name")
            .or_else(|| object.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FlowError::Config(format!("component in flow {flow_name} missing component_name"))
            })?
            .to_string();

        let kind = object
            .get("component_module")
            .or_else(|| object.get("component_class"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FlowError::Config(format!(
                    "component {component_name} in flow {flow_name} missing component_module"
                ))
            })?
            .to_string();

        let input_selection = object
            .get("input_selection")
            .or_else(|| object.get("component_input"))
            .and_then(|selection| match selection {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => map
                    .get("source_expression")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            });

        let input_transforms = object
            .get("input_transforms")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let queue_max_depth = object
            .get("component_queue_max_depth")
            .and_then(Value::as_u64)
            .map(|depth| depth.max(1) as usize)
            .unwrap_or(DEFAULT_QUEUE_MAX_DEPTH);

        let num_instances = object
            .get("num_instances")
            .and_then(Value::as_u64)
            .map(|n| n.max(1) as usize)
            .unwrap_or(1);

        let mut subscriptions = Vec::new();
        if let Some(subs) = object.get("subscriptions") {
            let list = subs.as_array().ok_or_else(|| {
                FlowError::Config(format!(
                    "component {component_name}: subscriptions must be a list"
                ))
            })?;
            for entry in list {
                let topic = entry.get("topic").and_then(Value::as_str).ok_or_else(|| {
                    FlowError::Config(format!(
                        "component {component_name}: subscription missing 'topic'"
                    ))
                })?;
                subscriptions.push(Subscription::new(topic));
            }
        }

        Ok(Self {
            component_name,
            kind,
            component_config: object
                .get("component_config")
                .cloned()
                .unwrap_or(Value::Object(Map::new())),
            input_selection,
            input_transforms,
            queue_max_depth,
            num_instances,
            subscriptions,
            broker_request_response: object.get("broker_request_response").cloned(),
            next_override: None,
            raw: value.clone(),
        })
    }

    /// Look up a config key: `component_config` first, then the node
    /// itself.
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.component_config.get(key).or_else(|| self.raw.get(key))
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config_value(key).and_then(Value::as_str)
    }

    pub fn config_bool(&self, key: &str, default: bool) -> bool {
        self.config_value(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn config_u64(&self, key: &str, default: u64) -> u64 {
        self.config_value(key).and_then(Value::as_u64).unwrap_or(default)
    }

    /// Validate declared parameters: fail on missing required ones, fill
    /// in defaults.
    pub fn apply_parameter_defaults(&mut self, info: &ComponentInfo) -> Result<(), FlowError> {
        if !self.component_config.is_object() {
            self.component_config = Value::Object(Map::new());
        }
        let Some(config) = self.component_config.as_object_mut() else {
            return Ok(());
        };
        for parameter in &info.config_parameters {
            let present = config.contains_key(parameter.name);
            if !present {
                if let Some(default) = &parameter.default {
                    config.insert(parameter.name.to_string(), default.clone());
                } else if parameter.required {
                    return Err(FlowError::Config(format!(
                        "config parameter {} is required but not present in component {}",
                        parameter.name, self.component_name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A flow's `name` + `components` configuration, parsed.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub name: String,
    pub components: Vec<ComponentNode>,
}

impl FlowConfig {
    pub fn from_value(value: &Value) -> Result<Self, FlowError> {
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::Config("flow missing name".to_string()))?
            .to_string();

        let components_value = value
            .get("components")
            .and_then(Value::as_array)
            .ok_or_else(|| FlowError::Config(format!("flow {name} missing components list")))?;
        if components_value.is_empty() {
            return Err(FlowError::EmptyFlow(name));
        }

        let mut components = Vec::with_capacity(components_value.len());
        for node in components_value {
            components.push(ComponentNode::from_value(node, &name)?);
        }

        Ok(Self { name, components })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::flow::component::ConfigParameter;

    #[test]
    fn parses_a_component_node() {
        let node = ComponentNode::from_value(
            &json!({
                "component_name": "enrich",
                "component_module": "pass_through",
                "component_config": {"key": "value"},
                "input_selection": {"source_expression": "input.payload:data"},
                "component_queue_max_depth": 10,
                "num_instances": 3,
                "subscriptions": [{"topic": "a/>"}],
            }),
            "flow1",
        )
        .unwrap();

        assert_eq!(node.component_name, "enrich");
        assert_eq!(node.kind, "pass_through");
        assert_eq!(node.input_selection.as_deref(), Some("input.payload:data"));
        assert_eq!(node.queue_max_depth, 10);
        assert_eq!(node.num_instances, 3);
        assert_eq!(node.subscriptions, vec![Subscription::new("a/>")]);
        assert_eq!(node.config_str("key"), Some("value"));
    }

    #[test]
    fn missing_name_or_module_fails() {
        assert!(ComponentNode::from_value(&json!({"component_module": "x"}), "f").is_err());
        assert!(ComponentNode::from_value(&json!({"component_name": "x"}), "f").is_err());
    }

    #[test]
    fn empty_flow_is_rejected() {
        let err = FlowConfig::from_value(&json!({"name": "f", "components": []}));
        assert!(matches!(err, Err(FlowError::EmptyFlow(name)) if name == "f"));
    }

    #[test]
    fn parameter_defaults_and_required() {
        let info = ComponentInfo::new("demo", "").with_parameters(vec![
            ConfigParameter::required("needed", ""),
            ConfigParameter::optional("depth", Some(json!(5)), ""),
        ]);

        let mut node = ComponentNode::from_value(
            &json!({"component_name": "c", "component_module": "demo",
                    "component_config": {"needed": true}}),
            "f",
        )
        .unwrap();
        node.apply_parameter_defaults(&info).unwrap();
        assert_eq!(node.config_value("depth"), Some(&json!(5)));

        let mut missing = ComponentNode::from_value(
            &json!({"component_name": "c", "component_module": "demo"}),
            "f",
        )
        .unwrap();
        assert!(missing.apply_parameter_defaults(&info).is_err());
    }
}
