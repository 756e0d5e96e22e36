//! The connector: process-level container owning apps, shared services,
//! the command/control plane, and the shutdown signal.
//!
//! Lifecycle: validate config → shared services → command/control (before
//! user apps) → apps → run → wait on shutdown → cleanup in reverse order.

// Layer 1: Standard library imports
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// Layer 3: Internal module imports
use super::error::ConnectorError;
use super::validation;
use crate::app::App;
use crate::control::{connector_entity, CommandControlService, TopologySnapshot};
use crate::message::Envelope;
use crate::services::{cache, CacheService, SharedServices};

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Connector {
    config: Value,
    services: SharedServices,
    apps: Vec<App>,
    control: Option<Arc<CommandControlService>>,
    topology: TopologySnapshot,
    cancel: CancellationToken,
}

impl Connector {
    /// Validate the configuration and construct shared services.
    ///
    /// Must run inside a tokio runtime (service tasks spawn here).
    pub fn new(config: Value) -> Result<Self, ConnectorError> {
        validation::validate_config(&config)?;

        let instance_name = config
            .get("instance_name")
            .and_then(Value::as_str)
            .unwrap_or("fluxmesh")
            .to_string();

        let cache_config = config.get("cache").cloned().unwrap_or(Value::Null);
        let backend_name = cache_config
            .get("backend")
            .and_then(Value::as_str)
            .unwrap_or("memory");
        let backend = cache::create_storage_backend(
            backend_name,
            cache_config.get("directory").and_then(Value::as_str),
        )?;

        let cancel = CancellationToken::new();
        let services =
            SharedServices::new(instance_name, cancel.clone(), CacheService::new(backend));

        Ok(Self {
            config,
            services,
            apps: Vec::new(),
            control: None,
            topology: Arc::new(RwLock::new(Value::Null)),
            cancel,
        })
    }

    /// Shared services; use before `run` to register custom components.
    pub fn services(&self) -> &SharedServices {
        &self.services
    }

    pub fn apps(&self) -> &[App] {
        &self.apps
    }

    pub fn get_app(&self, name: &str) -> Option<&App> {
        self.apps.iter().find(|app| app.name() == name)
    }

    pub fn control(&self) -> Option<Arc<CommandControlService>> {
        self.control.clone()
    }

    fn setup_trace_file(&self) {
        let Some(path) = self
            .config
            .get("trace")
            .and_then(|trace| trace.get("trace_file"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return;
        };

        tracing::info!(path = %path, "Setting up trace file");
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.services.trace_file.attach(tx);

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            use std::io::Write;
            let file = std::fs::OpenOptions::new().create(true).append(true).open(&path);
            let mut file = match file {
                Ok(file) => file,
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "Cannot open trace file");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    line = rx.recv() => {
                        let Some(line) = line else { return };
                        let timestamp = chrono::Utc::now().to_rfc3339();
                        if writeln!(file, "{timestamp}: {line}").is_err() {
                            return;
                        }
                        let _ = file.flush();
                    }
                }
            }
        });
    }

    fn app_configs(&self) -> Vec<Value> {
        if let Some(apps) = self.config.get("apps").and_then(Value::as_array) {
            return apps.clone();
        }
        // Deprecated top-level flows: wrap in a default app.
        let flows = self
            .config
            .get("flows")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        tracing::info!("Creating default app from top-level flows configuration");
        vec![json!({"name": "default_app", "flows": flows})]
    }

    fn snapshot_topology(&self) {
        let apps: Vec<Value> = self.apps.iter().map(|app| json!(app.name())).collect();
        let flows: Vec<Value> = self
            .apps
            .iter()
            .flat_map(|app| {
                app.flows().iter().map(|flow| {
                    json!({
                        "name": flow.name(),
                        "app": app.name(),
                        "components": flow.component_names(),
                    })
                })
            })
            .collect();
        *self.topology.write() = json!({"apps": apps, "flows": flows});
    }

    fn spawn_error_drain(&self) {
        if self.services.error_flow_claimed.load(Ordering::SeqCst) {
            return;
        }
        let error_queue = Arc::clone(&self.services.error_queue);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            while !cancel.is_cancelled() {
                if let Some(env) = error_queue.recv(Duration::from_secs(1)).await {
                    log_error_envelope(&env);
                }
            }
        });
    }

    /// Construct and start everything.
    pub async fn run(&mut self) -> Result<(), ConnectorError> {
        tracing::info!(instance = %self.services.instance_name, "Starting connector");
        self.setup_trace_file();

        // Command/control comes up before user apps so they can register
        // entities during construction.
        let command_control = self.config.get("command_control").cloned();
        if command_control
            .as_ref()
            .and_then(|cc| cc.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let control = CommandControlService::new(
                command_control.as_ref().unwrap_or(&Value::Null),
                &self.services,
            )?;
            self.services.set_control(Arc::clone(&control));
            self.control = Some(control);
        }

        for (index, app_value) in self.app_configs().iter().enumerate() {
            let num_instances = app_value
                .get("num_instances")
                .and_then(Value::as_u64)
                .map(|n| n.max(1))
                .unwrap_or(1);
            for _ in 0..num_instances {
                tracing::info!(
                    app = app_value.get("name").and_then(serde_json::Value::as_str).unwrap_or("?"),
                    "Creating app"
                );
                let app = App::new(app_value, None, index, &self.services)?;
                self.apps.push(app);
            }
        }

        self.snapshot_topology();
        if let Some(control) = &self.control {
            let entity = connector_entity(
                &self.services.instance_name,
                VERSION,
                Arc::clone(&self.topology),
                control.tracing(),
            );
            control.register_entity(entity);
        }

        self.spawn_error_drain();

        for app in &mut self.apps {
            app.run();
        }
        tracing::info!("Connector started successfully");
        Ok(())
    }

    /// Block until `stop` is called (or the token is cancelled).
    pub async fn wait(&self) {
        self.cancel.cancelled().await;
    }

    /// Signal graceful shutdown.
    pub fn stop(&self) {
        tracing::info!("Stopping connector");
        self.services.timers.stop();
        self.cancel.cancel();
    }

    /// Clean up apps (reverse construction order), then the control
    /// plane.
    pub async fn cleanup(&mut self) {
        tracing::info!("Cleaning up connector");
        self.stop();
        while let Some(mut app) = self.apps.pop() {
            app.cleanup().await;
        }
        if let Some(control) = self.control.take() {
            control.cleanup().await;
        }
        tracing::info!("Cleanup completed");
    }
}

fn log_error_envelope(env: &Envelope) {
    let payload = env.payload();
    tracing::error!(
        component = payload["location"]["component"].as_str().unwrap_or("?"),
        flow = payload["location"]["flow"].as_str().unwrap_or("?"),
        error = payload["error"]["text"].as_str().unwrap_or("?"),
        "Flow error"
    );
}
