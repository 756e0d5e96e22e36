//! Shared cache service with pluggable storage backends.
//!
//! Entries may carry an expiry; an expiry-checker task sweeps once a
//! second and delivers `Event::CacheExpiry` to the component that owns
//! the entry. The disk backend keeps one JSON file per key so cached
//! state survives restarts; everything else about the runtime is
//! deliberately stateless.

// Layer 1: Standard library imports
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// Layer 3: Internal module imports
use super::ComponentDirectory;
use crate::message::{CacheExpiryEvent, Event};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry is not valid json: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unknown cache backend: {0}")]
    UnknownBackend(String),
}

/// A stored cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub metadata: Option<Value>,
    pub expiry: Option<DateTime<Utc>>,
    /// Component key to notify on expiry.
    pub component: Option<String>,
}

/// Storage contract for cache backends.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheEntry>;
    fn set(&self, key: &str, entry: CacheEntry);
    fn remove(&self, key: &str) -> Option<CacheEntry>;
    fn keys(&self) -> Vec<String>;
}

/// Default in-memory backend.
#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: DashMap<String, CacheEntry>,
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// On-disk backend: one JSON file per key under a base directory.
pub struct DiskCacheBackend {
    base_dir: PathBuf,
}

impl DiskCacheBackend {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_dir.join(format!("{safe}.json"))
    }
}

impl CacheBackend for DiskCacheBackend {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        let bytes = std::fs::read(self.path_for(key)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn set(&self, key: &str, entry: CacheEntry) {
        match serde_json::to_vec_pretty(&entry) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(self.path_for(key), bytes) {
                    tracing::warn!(key, error = %e, "Failed to persist cache entry");
                }
            }
            Err(e) => tracing::warn!(key, error = %e, "Failed to serialize cache entry"),
        }
    }

    fn remove(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.get(key);
        let _ = std::fs::remove_file(self.path_for(key));
        entry
    }

    fn keys(&self) -> Vec<String> {
        let Ok(dir) = std::fs::read_dir(&self.base_dir) else {
            return Vec::new();
        };
        dir.filter_map(|entry| {
            let name = entry.ok()?.file_name().into_string().ok()?;
            name.strip_suffix(".json").map(str::to_string)
        })
        .collect()
    }
}

/// Build the backend selected by `cache.backend`.
pub fn create_storage_backend(
    backend: &str,
    disk_dir: Option<&str>,
) -> Result<Box<dyn CacheBackend>, CacheError> {
    match backend {
        "memory" => Ok(Box::new(MemoryCacheBackend::default())),
        "disk" => {
            let dir = disk_dir.unwrap_or(".fluxmesh_cache");
            Ok(Box::new(DiskCacheBackend::new(dir)?))
        }
        other => Err(CacheError::UnknownBackend(other.to_string())),
    }
}

/// The shared cache service.
pub struct CacheService {
    backend: Box<dyn CacheBackend>,
    directory: parking_lot::RwLock<Option<Arc<ComponentDirectory>>>,
}

impl CacheService {
    pub fn new(backend: Box<dyn CacheBackend>) -> Self {
        Self {
            backend,
            directory: parking_lot::RwLock::new(None),
        }
    }

    /// Attach the component directory and start the expiry checker.
    pub(crate) fn with_directory(
        self,
        directory: Arc<ComponentDirectory>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        *self.directory.write() = Some(directory);
        let service = Arc::new(self);
        let sweeper = Arc::clone(&service);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
                sweeper.sweep_expired().await;
            }
        });
        service
    }

    pub fn set(
        &self,
        key: &str,
        value: Value,
        metadata: Option<Value>,
        expiry: Option<Duration>,
        component: Option<&str>,
    ) {
        let entry = CacheEntry {
            value,
            metadata,
            expiry: expiry.and_then(|d| {
                chrono::Duration::from_std(d)
                    .ok()
                    .map(|delta| Utc::now() + delta)
            }),
            component: component.map(str::to_string),
        };
        self.backend.set(key, entry);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entry = self.backend.get(key)?;
        if let Some(expiry) = entry.expiry {
            if expiry <= Utc::now() {
                return None;
            }
        }
        Some(entry.value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.backend.remove(key).map(|entry| entry.value)
    }

    async fn sweep_expired(&self) {
        let now = Utc::now();
        for key in self.backend.keys() {
            let Some(entry) = self.backend.get(&key) else {
                continue;
            };
            let Some(expiry) = entry.expiry else { continue };
            if expiry > now {
                continue;
            }
            self.backend.remove(&key);

            let Some(component) = entry.component else { continue };
            let directory = self.directory.read().clone();
            let Some(sender) = directory.and_then(|d| d.sender(&component)) else {
                continue;
            };
            let event = Event::CacheExpiry(CacheExpiryEvent {
                key: key.clone(),
                expired_value: entry.value,
                metadata: entry.metadata,
            });
            if sender.send(event).await.is_err() {
                tracing::debug!(key, component = %component, "Expiry target channel closed");
            }
        }
    }
}
