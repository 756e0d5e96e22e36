//! Request router: resolves `(endpoint, verb)` against the entity
//! registry and invokes the handler.
//!
//! Status mapping: 200 on success, 400 on parameter validation failure,
//! 404 when no handler exists, 500 when the handler itself fails.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::Utc;
use serde_json::{json, Map, Value};

// Layer 3: Internal module imports
use super::registry::{EntityRegistry, HandlerArgs};
use super::schema;

/// A parsed command request.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub request_id: String,
    pub verb: String,
    pub endpoint: String,
    pub query_params: Map<String, Value>,
    pub body: Value,
    pub reply_to_topic_prefix: Option<String>,
    pub timestamp: Option<String>,
    pub source: String,
}

/// The HTTP-shaped response record published back to the requester.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub request_id: String,
    pub status_code: u16,
    pub status_message: String,
    pub body: Value,
    pub reply_to_topic_prefix: Option<String>,
}

impl CommandResponse {
    pub fn ok(request: &CommandRequest, body: Value) -> Self {
        Self {
            request_id: request.request_id.clone(),
            status_code: 200,
            status_message: "OK".to_string(),
            body,
            reply_to_topic_prefix: request.reply_to_topic_prefix.clone(),
        }
    }

    pub fn error(request: &CommandRequest, status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            request_id: request.request_id.clone(),
            status_code,
            status_message: message.clone(),
            body: json!({"error": message}),
            reply_to_topic_prefix: request.reply_to_topic_prefix.clone(),
        }
    }

    /// Wire shape of the response payload.
    pub fn to_value(&self) -> Value {
        json!({
            "request_id": self.request_id,
            "status_code": self.status_code,
            "status_message": self.status_message,
            "headers": {"content-type": "application/json"},
            "body": self.body,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }
}

/// Routes command requests to registered entity handlers.
pub struct RequestRouter {
    registry: Arc<EntityRegistry>,
}

impl RequestRouter {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self { registry }
    }

    pub fn route_request(&self, request: &CommandRequest) -> CommandResponse {
        tracing::info!(
            request_id = %request.request_id,
            verb = %request.verb,
            endpoint = %request.endpoint,
            "Routing request"
        );

        let Some(matched) = self
            .registry
            .find_endpoint_handler(&request.endpoint, &request.verb)
        else {
            return CommandResponse::error(
                request,
                404,
                format!("No handler found for {} {}", request.verb, request.endpoint),
            );
        };
        let Some(method) = matched.method else {
            return CommandResponse::error(
                request,
                404,
                format!("No handler found for {} {}", request.verb, request.endpoint),
            );
        };

        // Advisory parameter validation.
        let problem = schema::validate_path_params(&matched.path_params, &method.path_params_schema)
            .or_else(|| {
                schema::validate_query_params(&request.query_params, &method.query_params_schema)
            })
            .or_else(|| schema::validate_request_body(&request.body, &method.request_body_schema));
        if let Some(problem) = problem {
            return CommandResponse::error(
                request,
                400,
                format!("Parameter validation failed: {problem}"),
            );
        }

        let args = HandlerArgs {
            path_params: matched.path_params,
            query_params: request.query_params.clone(),
            body: request.body.clone(),
            context: json!({
                "request_id": request.request_id,
                "entity_id": matched.entity_id,
                "timestamp": request.timestamp,
                "source": request.source,
            }),
        };

        match (method.handler)(&args) {
            Ok(result) => CommandResponse::ok(request, result),
            Err(error) => {
                tracing::error!(
                    verb = %request.verb,
                    endpoint = %request.endpoint,
                    error = %error,
                    "Handler failed"
                );
                CommandResponse::error(request, 500, format!("Error processing request: {error}"))
            }
        }
    }
}
