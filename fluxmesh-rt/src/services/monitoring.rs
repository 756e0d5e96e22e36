// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use serde_json::{json, Value};

// Layer 3: Internal module imports
use crate::broker::ConnectionStatus;

/// Identifies one metric sample within the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub flow: String,
    pub component: String,
    pub component_index: usize,
    pub metric: String,
}

impl MetricKey {
    pub fn new(
        flow: impl Into<String>,
        component: impl Into<String>,
        component_index: usize,
        metric: impl Into<String>,
    ) -> Self {
        Self {
            flow: flow.into(),
            component: component.into(),
            component_index,
            metric: metric.into(),
        }
    }
}

/// Process-wide metric aggregator and connection-status map.
///
/// Broker components push their connection state here once a second; the
/// command/control plane reads snapshots for its metrics topic.
#[derive(Default)]
pub struct Monitoring {
    metrics: DashMap<MetricKey, Value>,
    connection_status: DashMap<String, ConnectionStatus>,
}

impl Monitoring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_metric(&self, key: MetricKey, value: Value) {
        self.metrics.insert(key, value);
    }

    pub fn set_connection_status(&self, component_key: &str, status: ConnectionStatus) {
        self.connection_status.insert(component_key.to_string(), status);
    }

    pub fn connection_status(&self, component_key: &str) -> Option<ConnectionStatus> {
        self.connection_status.get(component_key).map(|entry| *entry.value())
    }

    /// Metrics as a JSON object keyed `flow/component/index/metric`.
    pub fn metrics_snapshot(&self) -> Value {
        let mut out = serde_json::Map::new();
        for entry in self.metrics.iter() {
            let key = entry.key();
            out.insert(
                format!(
                    "{}/{}/{}/{}",
                    key.flow, key.component, key.component_index, key.metric
                ),
                entry.value().clone(),
            );
        }
        Value::Object(out)
    }

    /// Connection states as a JSON object.
    pub fn connection_snapshot(&self) -> Value {
        let mut out = serde_json::Map::new();
        for entry in self.connection_status.iter() {
            out.insert(entry.key().clone(), json!(entry.value().to_string()));
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_snapshot_keys() {
        let monitoring = Monitoring::new();
        monitoring.record_metric(MetricKey::new("f", "c", 0, "processed"), json!(12));
        let snapshot = monitoring.metrics_snapshot();
        assert_eq!(snapshot.get("f/c/0/processed"), Some(&json!(12)));
    }

    #[test]
    fn connection_status_map() {
        let monitoring = Monitoring::new();
        monitoring.set_connection_status("f.input.0", ConnectionStatus::Connected);
        assert_eq!(
            monitoring.connection_status("f.input.0"),
            Some(ConnectionStatus::Connected)
        );
        assert_eq!(
            monitoring.connection_snapshot().get("f.input.0"),
            Some(&json!("CONNECTED"))
        );
    }
}
