//! String key/value storage tiers.
//!
//! [`FileKvStore`] is the durable tier: every mutation rewrites a JSON file so
//! values survive restarts. [`MemoryKvStore`] is the fast-path tier and lives
//! only as long as the process.

use crate::error::{AppError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, error, info};

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

fn poisoned<T>(_: PoisonError<T>) -> AppError {
    AppError::Storage("storage lock poisoned".into())
}

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.write().map_err(poisoned)?.remove(key);
        Ok(())
    }
}

#[derive(Debug)]
pub struct FileKvStore {
    values: RwLock<HashMap<String, String>>,
    path: PathBuf,
}

impl FileKvStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Storage(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let values = Self::load(&path);
        Ok(Self {
            values: RwLock::new(values),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> HashMap<String, String> {
        match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<HashMap<String, String>>(&data) {
                Ok(values) => {
                    info!("Loaded {} stored values from {}", values.len(), path.display());
                    values
                }
                Err(e) => {
                    error!("Ignoring unreadable storage file {}: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No existing storage file at {}", path.display());
                HashMap::new()
            }
            Err(e) => {
                error!("Failed to read storage file {}: {}", path.display(), e);
                HashMap::new()
            }
        }
    }

    fn persist(&self, values: &HashMap<String, String>) -> Result<()> {
        let data = serde_json::to_string_pretty(values)
            .map_err(|e| AppError::Storage(format!("serialize failed: {}", e)))?;
        fs::write(&self.path, data).map_err(|e| {
            error!("Failed to write {}: {}", self.path.display(), e);
            AppError::Storage(format!("write failed: {}", e))
        })?;
        debug!("Persisted {} values to disk", values.len());
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write().map_err(poisoned)?;
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.write().map_err(poisoned)?;
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}
