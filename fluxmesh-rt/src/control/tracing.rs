//! Structured trace emission for the command/control plane.
//!
//! Traces are level-filtered before serialization: an event is published
//! iff its level is at or above the emitting entity's effective level
//! (per-entity override, else the default). A [`TraceContext`] bookends
//! an operation with `start` and `completion` events, measuring duration
//! and promoting the completion to `ERROR` when the operation failed.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Trace severity. Ordinal values: DEBUG=0, INFO=1, WARN=2, ERROR=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TraceLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl TraceLevel {
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceLevel::Debug => write!(f, "DEBUG"),
            TraceLevel::Info => write!(f, "INFO"),
            TraceLevel::Warn => write!(f, "WARN"),
            TraceLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for TraceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(TraceLevel::Debug),
            "INFO" => Ok(TraceLevel::Info),
            "WARN" => Ok(TraceLevel::Warn),
            "ERROR" => Ok(TraceLevel::Error),
            other => Err(format!("invalid trace level: {other}")),
        }
    }
}

/// Downstream publisher of serialized trace events (the broker adapter).
pub trait TracePublisher: Send + Sync {
    fn publish_trace(&self, entity_id: &str, level: &str, event: Value);
}

/// Level-filtered trace event emission with per-entity overrides.
pub struct TracingSystem {
    enabled: AtomicBool,
    default_level: RwLock<TraceLevel>,
    entity_levels: RwLock<HashMap<String, TraceLevel>>,
    publisher: RwLock<Option<Arc<dyn TracePublisher>>>,
}

impl TracingSystem {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            default_level: RwLock::new(TraceLevel::Info),
            entity_levels: RwLock::new(HashMap::new()),
            publisher: RwLock::new(None),
        }
    }

    pub fn set_publisher(&self, publisher: Arc<dyn TracePublisher>) {
        *self.publisher.write() = Some(publisher);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        tracing::info!(enabled, "Tracing toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_default_level(&self, level: TraceLevel) {
        *self.default_level.write() = level;
    }

    pub fn set_entity_level(&self, entity_id: &str, level: TraceLevel) {
        self.entity_levels.write().insert(entity_id.to_string(), level);
    }

    pub fn clear_entity_level(&self, entity_id: &str) {
        self.entity_levels.write().remove(entity_id);
    }

    /// Effective level: per-entity override, else the default.
    pub fn effective_level(&self, entity_id: &str) -> TraceLevel {
        self.entity_levels
            .read()
            .get(entity_id)
            .copied()
            .unwrap_or(*self.default_level.read())
    }

    /// Emit one trace event, subject to level filtering.
    #[allow(clippy::too_many_arguments)]
    pub fn emit_trace(
        &self,
        entity_id: &str,
        entity_type: &str,
        level: TraceLevel,
        operation: &str,
        stage: &str,
        request_id: Option<&str>,
        data: Option<Value>,
        error: Option<Value>,
        duration_ms: Option<u64>,
    ) {
        if !self.is_enabled() {
            return;
        }
        if level.value() < self.effective_level(entity_id).value() {
            return;
        }

        let request_id = request_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut event = Map::new();
        event.insert("entity_id".into(), json!(entity_id));
        event.insert("entity_type".into(), json!(entity_type));
        event.insert("trace_level".into(), json!(level.to_string()));
        event.insert("request_id".into(), json!(request_id));
        event.insert("operation".into(), json!(operation));
        event.insert("stage".into(), json!(stage));
        event.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        if let Some(data) = data {
            event.insert("data".into(), data);
        }
        if let Some(error) = error {
            event.insert("error".into(), error);
        }
        if let Some(duration_ms) = duration_ms {
            event.insert("duration_ms".into(), json!(duration_ms));
        }

        if let Some(publisher) = self.publisher.read().clone() {
            publisher.publish_trace(entity_id, &level.to_string(), Value::Object(event));
        } else {
            tracing::debug!(entity = entity_id, "No trace publisher attached, event dropped");
        }
    }

    /// Current configuration, as exposed on the `/trace` endpoint.
    pub fn configuration(&self) -> Value {
        let entity_levels: Map<String, Value> = self
            .entity_levels
            .read()
            .iter()
            .map(|(id, level)| (id.clone(), json!(level.to_string())))
            .collect();
        json!({
            "enabled": self.is_enabled(),
            "default_level": self.default_level.read().to_string(),
            "entity_levels": entity_levels,
        })
    }

    pub fn entity_configuration(&self, entity_id: &str) -> Value {
        json!({
            "entity_id": entity_id,
            "enabled": self.is_enabled(),
            "level": self.effective_level(entity_id).to_string(),
        })
    }

    /// Apply a configuration update (`PUT /trace` body).
    pub fn update_configuration(&self, config: &Value) -> bool {
        if let Some(enabled) = config.get("enabled").and_then(Value::as_bool) {
            self.set_enabled(enabled);
        }
        if let Some(level) = config.get("default_level").and_then(Value::as_str) {
            match level.parse() {
                Ok(level) => self.set_default_level(level),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring invalid default trace level");
                    return false;
                }
            }
        }
        if let Some(entity_levels) = config.get("entity_levels").and_then(Value::as_object) {
            for (entity_id, level) in entity_levels {
                match level.as_str().map(str::parse) {
                    Some(Ok(level)) => self.set_entity_level(entity_id, level),
                    _ => {
                        tracing::warn!(entity = %entity_id, "Ignoring invalid entity trace level");
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Open a span-like context for an operation.
    pub fn trace_context(
        self: &Arc<Self>,
        entity_id: &str,
        entity_type: &str,
        level: TraceLevel,
        operation: &str,
        request_id: Option<&str>,
        data: Option<Value>,
    ) -> TraceContext {
        TraceContext::new(
            Arc::clone(self),
            entity_id,
            entity_type,
            level,
            operation,
            request_id,
            data,
        )
    }
}

impl Default for TracingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped span: `start` on creation, `completion` (with `duration_ms`)
/// when dropped or explicitly completed. A recorded error promotes the
/// completion level to ERROR.
pub struct TraceContext {
    system: Arc<TracingSystem>,
    entity_id: String,
    entity_type: String,
    level: TraceLevel,
    operation: String,
    request_id: String,
    data: Option<Value>,
    start: std::time::Instant,
    error: Option<Value>,
    completed: bool,
}

impl TraceContext {
    fn new(
        system: Arc<TracingSystem>,
        entity_id: &str,
        entity_type: &str,
        level: TraceLevel,
        operation: &str,
        request_id: Option<&str>,
        data: Option<Value>,
    ) -> Self {
        let request_id = request_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        system.emit_trace(
            entity_id,
            entity_type,
            level,
            operation,
            "start",
            Some(&request_id),
            data.clone(),
            None,
            None,
        );

        Self {
            system,
            entity_id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            level,
            operation: operation.to_string(),
            request_id,
            data,
            start: std::time::Instant::now(),
            error: None,
            completed: false,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Emit an intermediate `progress` event.
    pub fn progress(&self, data: Option<Value>) {
        self.system.emit_trace(
            &self.entity_id,
            &self.entity_type,
            self.level,
            &self.operation,
            "progress",
            Some(&self.request_id),
            data.or_else(|| self.data.clone()),
            None,
            Some(self.start.elapsed().as_millis() as u64),
        );
    }

    /// Record a failure; the completion event will carry it at ERROR.
    pub fn fail(&mut self, error_type: &str, message: &str) {
        self.error = Some(json!({
            "type": error_type,
            "message": message,
        }));
    }

    /// Emit the completion event now instead of at drop.
    pub fn complete(mut self) {
        self.emit_completion();
    }

    fn emit_completion(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let level = if self.error.is_some() {
            TraceLevel::Error
        } else {
            self.level
        };
        self.system.emit_trace(
            &self.entity_id,
            &self.entity_type,
            level,
            &self.operation,
            "completion",
            Some(&self.request_id),
            self.data.clone(),
            self.error.clone(),
            Some(self.start.elapsed().as_millis() as u64),
        );
    }
}

impl Drop for TraceContext {
    fn drop(&mut self) {
        self.emit_completion();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CapturePublisher {
        events: parking_lot::Mutex<Vec<(String, String, Value)>>,
    }

    impl TracePublisher for CapturePublisher {
        fn publish_trace(&self, entity_id: &str, level: &str, event: Value) {
            self.events
                .lock()
                .push((entity_id.to_string(), level.to_string(), event));
        }
    }

    fn system_with_capture() -> (Arc<TracingSystem>, Arc<CapturePublisher>) {
        let system = Arc::new(TracingSystem::new());
        let capture = Arc::new(CapturePublisher::default());
        system.set_publisher(Arc::clone(&capture) as Arc<dyn TracePublisher>);
        (system, capture)
    }

    #[test]
    fn level_filtering_is_monotone() {
        let (system, capture) = system_with_capture();
        system.set_default_level(TraceLevel::Warn);

        system.emit_trace("e1", "component", TraceLevel::Info, "op", "start", None, None, None, None);
        assert!(capture.events.lock().is_empty());

        system.emit_trace("e1", "component", TraceLevel::Warn, "op", "start", None, None, None, None);
        system.emit_trace("e1", "component", TraceLevel::Error, "op", "start", None, None, None, None);
        assert_eq!(capture.events.lock().len(), 2);
    }

    #[test]
    fn entity_override_beats_default() {
        let (system, capture) = system_with_capture();
        system.set_default_level(TraceLevel::Error);
        system.set_entity_level("chatty", TraceLevel::Debug);

        system.emit_trace("chatty", "flow", TraceLevel::Debug, "op", "start", None, None, None, None);
        system.emit_trace("quiet", "flow", TraceLevel::Info, "op", "start", None, None, None, None);
        let events = capture.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "chatty");
    }

    #[test]
    fn context_emits_start_and_completion_with_duration() {
        let (system, capture) = system_with_capture();
        {
            let ctx = system.trace_context("e", "service", TraceLevel::Info, "GET /flows", None, None);
            ctx.progress(Some(json!({"step": 1})));
        }
        let events = capture.events.lock();
        let stages: Vec<&str> = events
            .iter()
            .map(|(_, _, e)| e["stage"].as_str().unwrap())
            .collect();
        assert_eq!(stages, vec!["start", "progress", "completion"]);
        assert!(events[2].2["duration_ms"].is_u64());
        // start/completion share a request id
        assert_eq!(events[0].2["request_id"], events[2].2["request_id"]);
    }

    #[test]
    fn error_promotes_completion_level() {
        let (system, capture) = system_with_capture();
        {
            let mut ctx =
                system.trace_context("e", "service", TraceLevel::Info, "op", Some("req-1"), None);
            ctx.fail("ValueError", "boom");
        }
        let events = capture.events.lock();
        let completion = &events[1].2;
        assert_eq!(completion["trace_level"], json!("ERROR"));
        assert_eq!(completion["error"]["type"], json!("ValueError"));
        assert_eq!(completion["error"]["message"], json!("boom"));
    }

    #[test]
    fn disabled_system_emits_nothing() {
        let (system, capture) = system_with_capture();
        system.set_enabled(false);
        system.emit_trace("e", "t", TraceLevel::Error, "op", "start", None, None, None, None);
        assert!(capture.events.lock().is_empty());
    }

    #[test]
    fn configuration_round_trip() {
        let (system, _capture) = system_with_capture();
        assert!(system.update_configuration(&json!({
            "enabled": true,
            "default_level": "DEBUG",
            "entity_levels": {"e1": "ERROR"},
        })));
        let config = system.configuration();
        assert_eq!(config["default_level"], json!("DEBUG"));
        assert_eq!(config["entity_levels"]["e1"], json!("ERROR"));
        assert_eq!(
            system.entity_configuration("e1")["level"],
            json!("ERROR")
        );

        assert!(!system.update_configuration(&json!({"default_level": "LOUD"})));
    }
}
