//! Task id → Google Calendar event id, persisted as one JSON record.
//!
//! Every mutation is a read-modify-write of the whole record, serialised by a
//! lock shared between clones. Concurrent writers for the same task are
//! last-writer-wins.

use crate::{
    error::{AppError, Result},
    storage::KvStore,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub const EVENT_MAP_KEY: &str = "google_calendar_event_map";

#[derive(Clone)]
pub struct EventIdentityMap {
    store: Arc<dyn KvStore>,
    write_lock: Arc<Mutex<()>>,
}

impl EventIdentityMap {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn get(&self, task_id: &str) -> Result<Option<String>> {
        Ok(self.read()?.remove(task_id))
    }

    pub fn set(&self, task_id: &str, event_id: &str) -> Result<()> {
        let _guard = self.lock()?;
        let mut mappings = self.read()?;
        mappings.insert(task_id.to_string(), event_id.to_string());
        self.write(&mappings)?;
        debug!("Mapped task {} to event {}", task_id, event_id);
        Ok(())
    }

    pub fn remove(&self, task_id: &str) -> Result<()> {
        let _guard = self.lock()?;
        let mut mappings = self.read()?;
        if mappings.remove(task_id).is_some() {
            self.write(&mappings)?;
            debug!("Unmapped task {}", task_id);
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| AppError::Storage("event map lock poisoned".into()))
    }

    fn read(&self) -> Result<HashMap<String, String>> {
        let Some(raw) = self.store.get(EVENT_MAP_KEY)? else {
            return Ok(HashMap::new());
        };
        match serde_json::from_str(&raw) {
            Ok(mappings) => Ok(mappings),
            Err(e) => {
                warn!("Event mapping record unreadable, starting empty: {}", e);
                Ok(HashMap::new())
            }
        }
    }

    fn write(&self, mappings: &HashMap<String, String>) -> Result<()> {
        let raw = serde_json::to_string(mappings)
            .map_err(|e| AppError::Storage(format!("serialize event map: {}", e)))?;
        self.store.set(EVENT_MAP_KEY, &raw)
    }
}
