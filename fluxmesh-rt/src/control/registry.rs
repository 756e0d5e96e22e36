//! Entity registry: managed entities and their endpoint tables.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{json, Map, Value};

/// Arguments passed to an endpoint handler.
#[derive(Debug, Clone)]
pub struct HandlerArgs {
    pub path_params: HashMap<String, String>,
    pub query_params: Map<String, Value>,
    pub body: Value,
    /// Request context: `{request_id, entity_id, timestamp, source}`.
    pub context: Value,
}

/// An endpoint handler; errors map to HTTP 500.
pub type EndpointHandler = Arc<dyn Fn(&HandlerArgs) -> Result<Value, String> + Send + Sync>;

/// One verb binding of an endpoint.
#[derive(Clone)]
pub struct EndpointMethod {
    pub description: String,
    /// Advisory schemas checked before the handler runs.
    pub path_params_schema: Value,
    pub query_params_schema: Value,
    pub request_body_schema: Value,
    pub handler: EndpointHandler,
}

impl EndpointMethod {
    pub fn new(description: impl Into<String>, handler: EndpointHandler) -> Self {
        Self {
            description: description.into(),
            path_params_schema: Value::Null,
            query_params_schema: Value::Null,
            request_body_schema: Value::Null,
            handler,
        }
    }

    pub fn with_body_schema(mut self, schema: Value) -> Self {
        self.request_body_schema = schema;
        self
    }
}

/// A `(path_template, verb → handler)` entry on an entity.
#[derive(Clone)]
pub struct Endpoint {
    /// Template with `{param}` placeholders, e.g. `/flows/{flow_id}`.
    pub path: String,
    pub methods: HashMap<String, EndpointMethod>,
}

impl Endpoint {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            methods: HashMap::new(),
        }
    }

    pub fn method(mut self, verb: &str, method: EndpointMethod) -> Self {
        self.methods.insert(verb.to_string(), method);
        self
    }
}

/// A managed entity's registration record.
#[derive(Clone)]
pub struct EntityDescriptor {
    pub entity_id: String,
    pub entity_type: String,
    pub entity_name: String,
    pub description: String,
    pub version: String,
    pub parent_entity_id: Option<String>,
    pub endpoints: Vec<Endpoint>,
    pub status_attributes: Value,
    pub metrics: Value,
    pub configuration: Value,
}

impl EntityDescriptor {
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
        entity_name: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            entity_name: entity_name.into(),
            description: String::new(),
            version: "1.0.0".to_string(),
            parent_entity_id: None,
            endpoints: Vec::new(),
            status_attributes: Value::Null,
            metrics: Value::Null,
            configuration: Value::Null,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_entity_id = Some(parent.into());
        self
    }

    pub fn with_endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.configuration = configuration;
        self
    }
}

struct CompiledEndpoint {
    pattern: Regex,
    entity_id: String,
    path_template: String,
    methods: HashMap<String, EndpointMethod>,
}

/// Compile a path template to an anchored regex with named captures.
///
/// `/a/{x}/b` becomes `^/a/(?P<x>[^/]+)/b$`.
fn compile_path_template(template: &str) -> Result<Regex, String> {
    let mut pattern = String::from("^");
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        pattern.push_str(&regex::escape(&rest[..start]));
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(format!("unterminated parameter in path template {template}"));
        };
        let name = &after[..end];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("invalid parameter name {name:?} in {template}"));
        }
        pattern.push_str(&format!("(?P<{name}>[^/]+)"));
        rest = &after[end + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| format!("invalid path template {template}: {e}"))
}

/// Result of an endpoint lookup.
pub struct EndpointMatch {
    pub method: Option<EndpointMethod>,
    pub path_params: HashMap<String, String>,
    pub entity_id: String,
}

/// Registry of managed entities and their endpoint matchers.
///
/// Registration is transactional: if any endpoint of an entity fails to
/// compile, none of the entity's endpoints remain and the entity itself
/// is not stored.
#[derive(Default)]
pub struct EntityRegistry {
    entities: RwLock<HashMap<String, EntityDescriptor>>,
    endpoints: RwLock<Vec<CompiledEndpoint>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity. Returns false (leaving the registry unchanged)
    /// on any endpoint compilation failure or duplicate entity id.
    pub fn register_entity(&self, descriptor: EntityDescriptor) -> bool {
        if descriptor.entity_id.is_empty() {
            tracing::error!("Cannot register entity without entity_id");
            return false;
        }
        if self.entities.read().contains_key(&descriptor.entity_id) {
            tracing::warn!(entity = %descriptor.entity_id, "Entity already registered");
            return false;
        }

        // Compile everything before touching the shared tables.
        let mut compiled = Vec::with_capacity(descriptor.endpoints.len());
        for endpoint in &descriptor.endpoints {
            if endpoint.methods.is_empty() {
                tracing::warn!(path = %endpoint.path, "Endpoint has no methods, skipping");
                continue;
            }
            match compile_path_template(&endpoint.path) {
                Ok(pattern) => compiled.push(CompiledEndpoint {
                    pattern,
                    entity_id: descriptor.entity_id.clone(),
                    path_template: endpoint.path.clone(),
                    methods: endpoint.methods.clone(),
                }),
                Err(e) => {
                    tracing::error!(
                        entity = %descriptor.entity_id,
                        path = %endpoint.path,
                        error = %e,
                        "Error registering endpoint"
                    );
                    return false;
                }
            }
        }

        self.endpoints.write().extend(compiled);
        self.entities
            .write()
            .insert(descriptor.entity_id.clone(), descriptor);
        true
    }

    /// Remove an entity and all of its endpoints.
    pub fn deregister_entity(&self, entity_id: &str) -> bool {
        if self.entities.write().remove(entity_id).is_none() {
            tracing::warn!(entity = %entity_id, "Entity not found, cannot deregister");
            return false;
        }
        let mut endpoints = self.endpoints.write();
        let before = endpoints.len();
        endpoints.retain(|endpoint| endpoint.entity_id != entity_id);
        tracing::info!(
            entity = %entity_id,
            endpoints = before - endpoints.len(),
            "Entity deregistered"
        );
        true
    }

    pub fn get_entity(&self, entity_id: &str) -> Option<EntityDescriptor> {
        self.entities.read().get(entity_id).cloned()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Find the handler for `(path, verb)`.
    ///
    /// `None` means no endpoint matched the path at all. A match with
    /// `method: None` means the path matched but the verb is unsupported.
    pub fn find_endpoint_handler(&self, path: &str, verb: &str) -> Option<EndpointMatch> {
        let endpoints = self.endpoints.read();
        for endpoint in endpoints.iter() {
            let Some(captures) = endpoint.pattern.captures(path) else {
                continue;
            };
            let path_params: HashMap<String, String> = endpoint
                .pattern
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|m| (name.to_string(), m.as_str().to_string()))
                })
                .collect();

            let method = endpoint.methods.get(verb).cloned();
            if method.is_none() {
                tracing::warn!(
                    verb,
                    path = %endpoint.path_template,
                    "Method not supported for endpoint"
                );
            }
            return Some(EndpointMatch {
                method,
                path_params,
                entity_id: endpoint.entity_id.clone(),
            });
        }
        None
    }

    /// Simplified registry view for the registry topic.
    pub fn registry_summary(&self) -> Value {
        let entities = self.entities.read();
        let summaries: Vec<Value> = entities
            .values()
            .map(|entity| {
                let endpoints: Vec<Value> = entity
                    .endpoints
                    .iter()
                    .map(|endpoint| {
                        json!({
                            "path": endpoint.path,
                            "methods": endpoint.methods.keys().collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                json!({
                    "entity_id": entity.entity_id,
                    "entity_type": entity.entity_type,
                    "entity_name": entity.entity_name,
                    "description": entity.description,
                    "version": entity.version,
                    "endpoints": endpoints,
                })
            })
            .collect();
        Value::Array(summaries)
    }
}
