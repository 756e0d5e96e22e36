//! Process-wide shared services injected into every component runner.

pub mod cache;
pub mod kv;
pub mod monitoring;
pub mod timer;

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// Layer 3: Internal module imports
use crate::broker::{ConnectionPool, DevBrokerHub};
use crate::components::ComponentRegistry;
use crate::message::{Envelope, Event};

pub use cache::{CacheBackend, CacheError, CacheService, DiskCacheBackend, MemoryCacheBackend};
pub use kv::{KeyValueStore, LockManager};
pub use monitoring::{MetricKey, Monitoring};
pub use timer::TimerManager;

/// Routing table from component keys to their input channels.
///
/// Runners register on start so the timer manager and cache service can
/// deliver `Timer` / `CacheExpiry` events without holding component
/// references.
#[derive(Default)]
pub struct ComponentDirectory {
    channels: DashMap<String, mpsc::Sender<Event>>,
}

impl ComponentDirectory {
    pub fn register(&self, key: &str, sender: mpsc::Sender<Event>) {
        self.channels.insert(key.to_string(), sender);
    }

    pub fn deregister(&self, key: &str) {
        self.channels.remove(key);
    }

    pub fn sender(&self, key: &str) -> Option<mpsc::Sender<Event>> {
        self.channels.get(key).map(|entry| entry.value().clone())
    }
}

/// The process-shared error queue.
///
/// Runners divert failed envelopes here; either a configured error flow
/// (via the `error_input` component) or the connector's log drain
/// consumes it.
pub struct ErrorQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl ErrorQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub fn push(&self, envelope: Envelope) {
        let _ = self.tx.send(envelope);
    }

    /// Receive the next error envelope, if any arrives within `timeout`.
    pub async fn recv(&self, timeout: std::time::Duration) -> Option<Envelope> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(envelope)) => Some(envelope),
            _ => None,
        }
    }
}

impl Default for ErrorQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Optional channel feeding the connector's trace file.
///
/// Disabled (every write a no-op) until the connector attaches a sender
/// because `trace.trace_file` was configured.
#[derive(Default)]
pub struct TraceFile {
    tx: RwLock<Option<mpsc::UnboundedSender<String>>>,
}

impl TraceFile {
    pub fn attach(&self, tx: mpsc::UnboundedSender<String>) {
        *self.tx.write() = Some(tx);
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.read().is_some()
    }

    pub fn write(&self, line: String) {
        if let Some(tx) = self.tx.read().as_ref() {
            let _ = tx.send(line);
        }
    }
}

/// Bundle of shared services handed to apps, flows and runners.
///
/// Cloning is cheap; all members are shared handles.
#[derive(Clone)]
pub struct SharedServices {
    pub instance_name: String,
    /// Process-wide shutdown signal; every blocking wait polls it.
    pub cancel: CancellationToken,
    pub timers: Arc<TimerManager>,
    pub cache: Arc<CacheService>,
    pub monitoring: Arc<Monitoring>,
    pub error_queue: Arc<ErrorQueue>,
    pub directory: Arc<ComponentDirectory>,
    pub dev_broker_hub: Arc<DevBrokerHub>,
    pub broker_pool: Arc<ConnectionPool>,
    pub components: Arc<ComponentRegistry>,
    pub trace_file: Arc<TraceFile>,
    /// Set once a flow claims the error queue via `error_input`.
    pub error_flow_claimed: Arc<std::sync::atomic::AtomicBool>,
    control: Arc<RwLock<Option<Arc<crate::control::CommandControlService>>>>,
}

impl SharedServices {
    pub fn new(instance_name: impl Into<String>, cancel: CancellationToken, cache: CacheService) -> Self {
        let directory = Arc::new(ComponentDirectory::default());
        Self {
            instance_name: instance_name.into(),
            cancel: cancel.clone(),
            timers: Arc::new(TimerManager::new(cancel.clone(), Arc::clone(&directory))),
            cache: cache.with_directory(Arc::clone(&directory), cancel),
            monitoring: Arc::new(Monitoring::new()),
            error_queue: Arc::new(ErrorQueue::new()),
            directory,
            dev_broker_hub: Arc::new(DevBrokerHub::new()),
            broker_pool: Arc::new(ConnectionPool::new()),
            components: Arc::new(ComponentRegistry::with_builtins()),
            trace_file: Arc::new(TraceFile::default()),
            error_flow_claimed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            control: Arc::new(RwLock::new(None)),
        }
    }

    /// Default services for tests and embedding.
    pub fn for_testing() -> Self {
        Self::new(
            "test-instance",
            CancellationToken::new(),
            CacheService::new(Box::new(MemoryCacheBackend::default())),
        )
    }

    /// Install the command/control service once it has been constructed.
    pub fn set_control(&self, control: Arc<crate::control::CommandControlService>) {
        *self.control.write() = Some(control);
    }

    pub fn control(&self) -> Option<Arc<crate::control::CommandControlService>> {
        self.control.read().clone()
    }
}
