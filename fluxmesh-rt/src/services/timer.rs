// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

// Layer 3: Internal module imports
use super::ComponentDirectory;
use crate::message::{Event, TimerEvent};

/// Process-wide timer service.
///
/// Timers deliver `Event::Timer` into the owning component's input
/// channel, so timer handling shares the per-component ordering
/// guarantees of message handling. Repeating timers rearm after each
/// delivery; all timers die with the process-wide cancellation token.
pub struct TimerManager {
    cancel: CancellationToken,
    directory: Arc<ComponentDirectory>,
    timers: DashMap<(String, String), CancellationToken>,
}

impl TimerManager {
    pub fn new(cancel: CancellationToken, directory: Arc<ComponentDirectory>) -> Self {
        Self {
            cancel,
            directory,
            timers: DashMap::new(),
        }
    }

    /// Arm a timer for the component registered under `component_key`.
    ///
    /// An existing timer with the same `(component_key, timer_id)` is
    /// replaced.
    pub fn add_timer(
        &self,
        component_key: &str,
        timer_id: &str,
        delay: Duration,
        interval: Option<Duration>,
        payload: Option<Value>,
    ) {
        let key = (component_key.to_string(), timer_id.to_string());
        let token = self.cancel.child_token();
        if let Some(previous) = self.timers.insert(key, token.clone()) {
            previous.cancel();
        }

        let directory = Arc::clone(&self.directory);
        let component_key = component_key.to_string();
        let timer_id = timer_id.to_string();
        tokio::spawn(async move {
            let mut wait = delay;
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }

                let event = Event::Timer(TimerEvent {
                    timer_id: timer_id.clone(),
                    payload: payload.clone(),
                });
                match directory.sender(&component_key) {
                    Some(sender) => {
                        if sender.send(event).await.is_err() {
                            tracing::debug!(component = %component_key, timer = %timer_id,
                                "Timer target channel closed, disarming");
                            return;
                        }
                    }
                    None => {
                        tracing::debug!(component = %component_key, timer = %timer_id,
                            "Timer target not registered, disarming");
                        return;
                    }
                }

                match interval {
                    Some(interval) => wait = interval,
                    None => return,
                }
            }
        });
    }

    /// Cancel a timer; pending fires are dropped.
    pub fn cancel_timer(&self, component_key: &str, timer_id: &str) {
        if let Some((_, token)) = self
            .timers
            .remove(&(component_key.to_string(), timer_id.to_string()))
        {
            token.cancel();
        }
    }

    /// Cancel everything (process shutdown).
    pub fn stop(&self) {
        for entry in self.timers.iter() {
            entry.value().cancel();
        }
        self.timers.clear();
    }
}
