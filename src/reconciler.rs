//! Keeps one Google Calendar event in step with each synced task.

use crate::{
    calendar::{CalendarApi, CalendarError, CalendarResult},
    error::{AppError, Result},
    identity_map::EventIdentityMap,
    task::{build_event_payload, EventPayload, SyncableTask},
    token_manager::TokenLifecycleManager,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of syncing a saved task. A failed sync is a warning, not an error:
/// the task itself has already been saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

fn sync_failed(err: CalendarError) -> AppError {
    AppError::SyncFailed(err.to_string())
}

fn downgrade_sync_failure(task_id: &str, result: Result<Option<String>>) -> Result<SyncReport> {
    match result {
        Ok(event_id) => Ok(SyncReport {
            synced: true,
            event_id,
            warning: None,
        }),
        Err(AppError::SyncFailed(message)) => {
            warn!("Calendar sync for task {} failed: {}", task_id, message);
            Ok(SyncReport {
                synced: false,
                event_id: None,
                warning: Some(format!(
                    "Task saved, but Google Calendar could not be updated: {}",
                    message
                )),
            })
        }
        Err(e) => Err(e),
    }
}

pub struct CalendarEventReconciler {
    manager: Arc<TokenLifecycleManager>,
    calendar: Arc<dyn CalendarApi>,
    identities: EventIdentityMap,
    time_zone: String,
}

impl CalendarEventReconciler {
    pub fn new(
        manager: Arc<TokenLifecycleManager>,
        calendar: Arc<dyn CalendarApi>,
        identities: EventIdentityMap,
        time_zone: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            calendar,
            identities,
            time_zone: time_zone.into(),
        }
    }

    /// Create or update the task's event and return its id.
    pub async fn upsert(&self, task: &SyncableTask) -> Result<String> {
        let payload = build_event_payload(task, &self.time_zone);

        let Some(event_id) = self.identities.get(&task.id)? else {
            return self.create_and_map(task, &payload).await;
        };

        let calendar = &self.calendar;
        let payload_ref = &payload;
        let event_ref = event_id.as_str();
        let result = self
            .with_token(|token| async move {
                calendar.update_event(&token, event_ref, payload_ref).await
            })
            .await?;

        match result {
            Ok(()) => {
                debug!("Updated event {} for task {}", event_id, task.id);
                Ok(event_id)
            }
            Err(CalendarError::NotFound) => {
                info!(
                    "Event {} for task {} no longer exists, recreating",
                    event_id, task.id
                );
                self.create_and_map(task, &payload).await
            }
            Err(e) => Err(sync_failed(e)),
        }
    }

    /// Delete the task's event, if it has one. The mapping is dropped whatever
    /// the outcome of the delete call.
    pub async fn remove(&self, task_id: &str) -> Result<()> {
        let Some(event_id) = self.identities.get(task_id)? else {
            debug!("Task {} has no calendar event, nothing to remove", task_id);
            return Ok(());
        };

        let calendar = &self.calendar;
        let event_ref = event_id.as_str();
        let result = self
            .with_token(|token| async move { calendar.delete_event(&token, event_ref).await })
            .await;

        self.identities.remove(task_id)?;

        match result? {
            Ok(()) => {
                info!("Deleted event {} for task {}", event_id, task_id);
                Ok(())
            }
            Err(CalendarError::NotFound) => {
                debug!("Event {} was already gone", event_id);
                Ok(())
            }
            Err(e) => Err(sync_failed(e)),
        }
    }

    /// Task-save entry point: sync or unsync depending on the task's flag,
    /// downgrading calendar failures to a warning.
    pub async fn sync_task(&self, task: &SyncableTask) -> Result<SyncReport> {
        let result = if task.sync_enabled {
            self.upsert(task).await.map(Some)
        } else {
            self.remove(&task.id).await.map(|_| None)
        };
        downgrade_sync_failure(&task.id, result)
    }

    /// Task-delete entry point.
    pub async fn unsync_task(&self, task_id: &str) -> Result<SyncReport> {
        let result = self.remove(task_id).await.map(|_| None);
        downgrade_sync_failure(task_id, result)
    }

    async fn create_and_map(&self, task: &SyncableTask, payload: &EventPayload) -> Result<String> {
        let calendar = &self.calendar;
        let event_id = self
            .with_token(|token| async move { calendar.create_event(&token, payload).await })
            .await?
            .map_err(sync_failed)?;

        self.identities.set(&task.id, &event_id)?;
        info!("Created event {} for task {}", event_id, task.id);
        Ok(event_id)
    }

    /// Run `op` with a valid access token. A 401 forces one refresh and one
    /// retry; token-layer failures come back as the outer error.
    async fn with_token<T, F, Fut>(&self, op: F) -> Result<CalendarResult<T>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = CalendarResult<T>>,
    {
        let token = self.manager.ensure_valid_access_token().await?;
        match op(token.clone()).await {
            Err(CalendarError::Unauthorized) => {
                warn!("Calendar API rejected access token, refreshing once");
                let fresh = self.manager.force_refresh(&token).await?;
                Ok(op(fresh).await)
            }
            other => Ok(other),
        }
    }
}
