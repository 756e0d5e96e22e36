//! Advisory schema validation for command/control requests.
//!
//! Handlers declare lightweight JSON-schema-like shapes for path
//! parameters, query parameters and request bodies. Validation is
//! best-effort: unknown schema constructs are ignored, a `Null` schema
//! accepts anything.

// Layer 1: Standard library imports
use std::collections::HashMap;

// Layer 2: Third-party crate imports
use serde_json::{Map, Value};

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "any" => true,
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Validate `value` against a schema fragment. Returns the first problem
/// found, if any.
pub fn validate_value(value: &Value, schema: &Value, location: &str) -> Option<String> {
    let Some(schema) = schema.as_object() else {
        return None;
    };

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(value, expected) {
            return Some(format!("{location}: expected {expected}"));
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let object = value.as_object();
        for key in required.iter().filter_map(Value::as_str) {
            if object.is_none_or(|map| !map.contains_key(key)) {
                return Some(format!("{location}: missing required property {key}"));
            }
        }
    }

    if let (Some(properties), Some(object)) = (
        schema.get("properties").and_then(Value::as_object),
        value.as_object(),
    ) {
        for (key, property_schema) in properties {
            if let Some(property) = object.get(key) {
                if let Some(problem) =
                    validate_value(property, property_schema, &format!("{location}.{key}"))
                {
                    return Some(problem);
                }
            }
        }
    }

    None
}

/// Validate extracted path parameters against their declared schema.
///
/// Path parameters are always strings on the wire; the schema mainly
/// flags parameters the template does not actually capture.
pub fn validate_path_params(
    path_params: &HashMap<String, String>,
    schema: &Value,
) -> Option<String> {
    let Some(schema) = schema.as_object() else {
        return None;
    };
    for name in schema.keys() {
        if !path_params.contains_key(name) {
            return Some(format!("path parameter {name} not present"));
        }
    }
    None
}

/// Validate query parameters against a `{name: {type}}` schema.
pub fn validate_query_params(query_params: &Map<String, Value>, schema: &Value) -> Option<String> {
    let Some(schema) = schema.as_object() else {
        return None;
    };
    for (name, parameter_schema) in schema {
        let required = parameter_schema
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        match query_params.get(name) {
            Some(value) => {
                if let Some(problem) =
                    validate_value(value, parameter_schema, &format!("query.{name}"))
                {
                    return Some(problem);
                }
            }
            None if required => {
                return Some(format!("missing required query parameter {name}"));
            }
            None => {}
        }
    }
    None
}

/// Validate a request body against the handler's declared schema.
pub fn validate_request_body(body: &Value, schema: &Value) -> Option<String> {
    if schema.is_null() {
        return None;
    }
    validate_value(body, schema, "body")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn null_schema_accepts_everything() {
        assert!(validate_request_body(&json!({"x": 1}), &Value::Null).is_none());
        assert!(validate_value(&json!(42), &Value::Null, "v").is_none());
    }

    #[test]
    fn type_mismatch_is_reported() {
        let schema = json!({"type": "object", "required": ["name"]});
        assert!(validate_request_body(&json!("text"), &schema).is_some());
        assert!(validate_request_body(&json!({}), &schema).is_some());
        assert!(validate_request_body(&json!({"name": "x"}), &schema).is_none());
    }

    #[test]
    fn nested_properties_are_checked() {
        let schema = json!({
            "type": "object",
            "properties": {"depth": {"type": "integer"}},
        });
        assert!(validate_request_body(&json!({"depth": "five"}), &schema).is_some());
        assert!(validate_request_body(&json!({"depth": 5}), &schema).is_none());
    }

    #[test]
    fn query_param_requirements() {
        let schema = json!({"limit": {"type": "integer", "required": true}});
        let mut params = Map::new();
        assert!(validate_query_params(&params, &schema).is_some());
        params.insert("limit".into(), json!(10));
        assert!(validate_query_params(&params, &schema).is_none());
    }
}
