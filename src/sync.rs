//! Task save/delete hooks that keep Google Calendar in step.

use crate::{
    error::{AppError, Result},
    reconciler::SyncReport,
    task::{SyncableTask, TaskRecord},
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use tracing::{debug, warn};

/// Called after a task is saved. The path id wins over any id in the body.
pub async fn sync_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    body: std::result::Result<Json<TaskRecord>, JsonRejection>,
) -> Result<Json<SyncReport>> {
    let Json(mut record) =
        body.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    record.id = Some(task_id);
    let task = SyncableTask::try_from(record)?;
    debug!("Syncing task {} (enabled={})", task.id, task.sync_enabled);

    let report = state.reconciler.sync_task(&task).await.map_err(|e| {
        if e.requires_authentication() {
            warn!("Task {} not synced: Google Calendar needs reconnecting", task.id);
        }
        e
    })?;
    Ok(Json(report))
}

/// Called after a task is deleted.
pub async fn unsync_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<SyncReport>> {
    Ok(Json(state.reconciler.unsync_task(&task_id).await?))
}
