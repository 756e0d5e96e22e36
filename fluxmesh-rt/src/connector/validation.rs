//! Fail-fast structural validation of the configuration document.
//!
//! Validation errors are fatal at startup only; nothing here is checked
//! again at runtime.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use serde_json::Value;

// Layer 3: Internal module imports
use super::error::ConnectorError;

fn fail(message: impl Into<String>) -> ConnectorError {
    ConnectorError::Config(message.into())
}

fn validate_component_entry(
    component: &Value,
    index: usize,
    context: &str,
    require_component_name_key: bool,
) -> Result<(), ConnectorError> {
    let Some(object) = component.as_object() else {
        return Err(fail(format!(
            "component definition at index {index} in {context} must be a mapping"
        )));
    };

    let name = object
        .get("component_name")
        .or_else(|| if require_component_name_key { None } else { object.get("name") })
        .and_then(Value::as_str);
    let Some(name) = name else {
        return Err(fail(format!(
            "component_name not provided at index {index} in {context}"
        )));
    };

    if object.get("component_module").and_then(Value::as_str).is_none()
        && object.get("component_class").and_then(Value::as_str).is_none()
    {
        return Err(fail(format!(
            "component {name} in {context} missing component_module or component_class"
        )));
    }

    if let Some(subscriptions) = object.get("subscriptions") {
        let Some(list) = subscriptions.as_array() else {
            return Err(fail(format!(
                "component {name} in {context} has invalid subscriptions (must be a list)"
            )));
        };
        for (sub_index, subscription) in list.iter().enumerate() {
            if subscription.get("topic").and_then(Value::as_str).is_none() {
                return Err(fail(format!(
                    "component {name} in {context}: subscription at index {sub_index} missing 'topic'"
                )));
            }
        }
    }
    Ok(())
}

fn validate_flows(flows: &Value, context: &str) -> Result<(), ConnectorError> {
    let Some(list) = flows.as_array() else {
        return Err(fail(format!("flows definition in {context} must be a list")));
    };

    for (index, flow) in list.iter().enumerate() {
        let Some(object) = flow.as_object() else {
            return Err(fail(format!(
                "flow definition at index {index} in {context} must be a mapping"
            )));
        };
        let Some(name) = object.get("name").and_then(Value::as_str) else {
            return Err(fail(format!("flow name not provided in flow {index} of {context}")));
        };

        let Some(components) = object.get("components").and_then(Value::as_array) else {
            return Err(fail(format!(
                "flow components list not provided in flow {name} of {context}"
            )));
        };
        if components.is_empty() {
            return Err(fail(format!(
                "flow {name} in {context} must have at least one component"
            )));
        }
        for (component_index, component) in components.iter().enumerate() {
            validate_component_entry(
                component,
                component_index,
                &format!("flow {name} of {context}"),
                true,
            )?;
        }
    }
    Ok(())
}

fn validate_simplified_app(app: &Value, app_name: &str) -> Result<(), ConnectorError> {
    let Some(broker) = app.get("broker").and_then(Value::as_object) else {
        return Err(fail(format!(
            "app {app_name} has invalid 'broker' section (must be a mapping)"
        )));
    };
    if broker
        .get("input_enabled")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        && broker.get("queue_name").and_then(Value::as_str).is_none()
    {
        return Err(fail(format!(
            "app {app_name} broker config missing 'queue_name' when 'input_enabled' is true"
        )));
    }

    let Some(components) = app.get("components").and_then(Value::as_array) else {
        return Err(fail(format!(
            "app {app_name} has invalid 'components' section (must be a list)"
        )));
    };
    if components.is_empty() {
        return Err(fail(format!(
            "app {app_name} must have at least one component defined in 'components'"
        )));
    }
    for (index, component) in components.iter().enumerate() {
        validate_component_entry(component, index, &format!("app {app_name}"), false)?;
    }
    Ok(())
}

/// Validate the whole configuration document.
pub fn validate_config(config: &Value) -> Result<(), ConnectorError> {
    if !config.is_object() {
        return Err(fail("no config provided"));
    }
    if config.get("apps").is_none() && config.get("flows").is_none() {
        return Err(fail("no 'apps' or 'flows' defined in configuration"));
    }
    if config.get("log").is_none() {
        tracing::warn!("No log config provided, using defaults");
    }

    if let Some(apps) = config.get("apps") {
        let Some(list) = apps.as_array() else {
            return Err(fail("'apps' must be a list"));
        };
        for (index, app) in list.iter().enumerate() {
            let Some(object) = app.as_object() else {
                return Err(fail(format!("app definition at index {index} must be a mapping")));
            };
            let Some(name) = object.get("name").and_then(Value::as_str) else {
                return Err(fail(format!("app name not provided in app definition at index {index}")));
            };

            let has_flows = object.contains_key("flows");
            let has_broker = object.contains_key("broker");
            let has_components = object.contains_key("components");

            if !has_flows && !(has_broker && has_components) {
                return Err(fail(format!(
                    "app {name} must define either 'flows' or both 'broker' and 'components'"
                )));
            }
            if has_flows {
                if has_broker || has_components {
                    tracing::warn!(
                        app = name,
                        "App defines both 'flows' and 'broker'/'components'; standard mode wins"
                    );
                }
                validate_flows(&app["flows"], &format!("app {name}"))?;
            } else {
                validate_simplified_app(app, name)?;
            }
        }
    }

    if let Some(flows) = config.get("flows") {
        if !flows.is_array() {
            return Err(fail("'flows' at the top level must be a list"));
        }
        if config.get("apps").is_none() {
            tracing::warn!(
                "Using deprecated top-level 'flows'; consider defining flows within 'apps'"
            );
            validate_flows(flows, "top level")?;
        } else {
            tracing::warn!("Ignoring top-level 'flows' because 'apps' is also defined");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn requires_apps_or_flows() {
        assert!(validate_config(&json!({})).is_err());
        assert!(validate_config(&json!({"instance_name": "x"})).is_err());
    }

    #[test]
    fn valid_standard_app_passes() {
        let config = json!({
            "apps": [{
                "name": "app1",
                "flows": [{
                    "name": "flow1",
                    "components": [{
                        "component_name": "c1",
                        "component_module": "pass_through",
                    }],
                }],
            }],
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn flow_without_components_fails() {
        let config = json!({
            "apps": [{"name": "a", "flows": [{"name": "f", "components": []}]}],
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn component_missing_module_fails() {
        let config = json!({
            "apps": [{"name": "a", "flows": [{"name": "f",
                "components": [{"component_name": "c1"}]}]}],
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn simplified_app_requires_queue_when_input_enabled() {
        let base = json!({
            "apps": [{
                "name": "simple",
                "broker": {"input_enabled": true},
                "components": [{"name": "c", "component_module": "pass_through"}],
            }],
        });
        assert!(validate_config(&base).is_err());

        let with_queue = json!({
            "apps": [{
                "name": "simple",
                "broker": {"input_enabled": true, "queue_name": "q"},
                "components": [{"name": "c", "component_module": "pass_through"}],
            }],
        });
        assert!(validate_config(&with_queue).is_ok());
    }

    #[test]
    fn app_with_neither_form_fails() {
        let config = json!({"apps": [{"name": "empty"}]});
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn bad_subscription_shapes_fail() {
        let config = json!({
            "apps": [{
                "name": "simple",
                "broker": {"queue_name": "q"},
                "components": [{
                    "name": "c",
                    "component_module": "pass_through",
                    "subscriptions": "orders/>",
                }],
            }],
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn top_level_flows_are_accepted() {
        let config = json!({
            "flows": [{
                "name": "legacy",
                "components": [{
                    "component_name": "c1",
                    "component_module": "pass_through",
                }],
            }],
        });
        assert!(validate_config(&config).is_ok());
    }
}
