// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Connection state of a broker connection.
///
/// Three states, four transitions:
///
/// ```text
/// Disconnected -> Connected <-> Reconnecting -> Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionStatus::Connected => write!(f, "CONNECTED"),
            ConnectionStatus::Reconnecting => write!(f, "RECONNECTING"),
        }
    }
}

/// Publishes connection-state transitions through a watch channel so
/// broker components can drain them into connection-status metrics.
#[derive(Debug, Clone)]
pub struct ConnectionMonitor {
    tx: watch::Sender<ConnectionStatus>,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionStatus::Disconnected);
        Self { tx }
    }

    pub fn set(&self, status: ConnectionStatus) {
        let previous = *self.tx.borrow();
        if previous != status {
            tracing::debug!(from = %previous, to = %status, "Broker connection transition");
            let _ = self.tx.send(status);
        }
    }

    pub fn get(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_are_observable() {
        let monitor = ConnectionMonitor::new();
        let mut rx = monitor.subscribe();
        assert_eq!(monitor.get(), ConnectionStatus::Disconnected);

        monitor.set(ConnectionStatus::Connected);
        rx.changed().await.ok();
        assert_eq!(*rx.borrow(), ConnectionStatus::Connected);

        monitor.set(ConnectionStatus::Reconnecting);
        rx.changed().await.ok();
        assert_eq!(*rx.borrow(), ConnectionStatus::Reconnecting);
    }

    #[tokio::test]
    async fn redundant_set_does_not_notify() {
        let monitor = ConnectionMonitor::new();
        let mut rx = monitor.subscribe();
        rx.borrow_and_update();
        monitor.set(ConnectionStatus::Disconnected);
        assert!(!rx.has_changed().unwrap_or(true));
    }
}
