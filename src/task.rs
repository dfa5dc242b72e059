//! Task fields the calendar sync reads, and the event body built from them.

use crate::error::{AppError, Result};
use chrono::{DateTime, Duration, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};

const DEFAULT_EVENT_MINUTES: i64 = 60;
const DEFAULT_REMINDER_LEAD_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl TaskPriority {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Some(TaskPriority::High),
            "medium" => Some(TaskPriority::Medium),
            "low" => Some(TaskPriority::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" | "done" => TaskStatus::Completed,
            "in-progress" | "in_progress" | "inprogress" => TaskStatus::InProgress,
            _ => TaskStatus::Pending,
        }
    }
}

/// Task record as it arrives from the app, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub sync_enabled: Option<bool>,
    pub reminders_enabled: Option<bool>,
    pub reminder_lead_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncableTask {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: Option<DateTime<FixedOffset>>,
    pub priority: Option<TaskPriority>,
    pub status: TaskStatus,
    pub sync_enabled: bool,
    pub reminders_enabled: bool,
    pub reminder_lead_minutes: u32,
}

fn parse_time(field: &str, raw: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map_err(|e| AppError::BadRequest(format!("{} is not an RFC 3339 timestamp: {}", field, e)))
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("{} is required", field)))
}

impl TryFrom<TaskRecord> for SyncableTask {
    type Error = AppError;

    fn try_from(record: TaskRecord) -> Result<Self> {
        let id = required("id", record.id)?;
        let title = required("title", record.title)?;
        let start_time = parse_time("startTime", &required("startTime", record.start_time)?)?;
        let end_time = record
            .end_time
            .filter(|v| !v.trim().is_empty())
            .map(|raw| parse_time("endTime", &raw))
            .transpose()?;

        Ok(Self {
            id,
            title,
            description: record.description,
            start_time,
            end_time,
            priority: record.priority.as_deref().and_then(TaskPriority::parse),
            status: record
                .status
                .as_deref()
                .map(TaskStatus::parse)
                .unwrap_or(TaskStatus::Pending),
            sync_enabled: record.sync_enabled.unwrap_or(false),
            reminders_enabled: record.reminders_enabled.unwrap_or(false),
            reminder_lead_minutes: record
                .reminder_lead_minutes
                .unwrap_or(DEFAULT_REMINDER_LEAD_MINUTES),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    pub date_time: String,
    pub time_zone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderOverride {
    pub method: String,
    pub minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReminders {
    pub use_default: bool,
    pub overrides: Vec<ReminderOverride>,
}

/// Google Calendar event body, shared by create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: EventDateTime,
    pub end: EventDateTime,
    pub color_id: String,
    pub reminders: EventReminders,
}

/// Calendar colour id. Values follow Google's event palette: 8 graphite,
/// 11 tomato, 6 tangerine, 2 sage, 1 lavender.
pub fn color_id(task: &SyncableTask) -> &'static str {
    if task.status == TaskStatus::Completed {
        return "8";
    }
    match task.priority {
        Some(TaskPriority::High) => "11",
        Some(TaskPriority::Medium) => "6",
        Some(TaskPriority::Low) => "2",
        None => "1",
    }
}

pub fn build_event_payload(task: &SyncableTask, time_zone: &str) -> EventPayload {
    let end_time = task
        .end_time
        .unwrap_or(task.start_time + Duration::minutes(DEFAULT_EVENT_MINUTES));
    let at = |time: DateTime<FixedOffset>| EventDateTime {
        date_time: time.to_rfc3339_opts(SecondsFormat::Secs, false),
        time_zone: time_zone.to_string(),
    };

    let reminders = if task.reminders_enabled {
        EventReminders {
            use_default: false,
            overrides: vec![ReminderOverride {
                method: "popup".to_string(),
                minutes: task.reminder_lead_minutes,
            }],
        }
    } else {
        EventReminders {
            use_default: true,
            overrides: Vec::new(),
        }
    };

    EventPayload {
        summary: task.title.clone(),
        description: task.description.clone(),
        start: at(task.start_time),
        end: at(end_time),
        color_id: color_id(task).to_string(),
        reminders,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> TaskRecord {
        serde_json::from_value(value).unwrap()
    }

    fn task(value: serde_json::Value) -> SyncableTask {
        let mut base = json!({
            "id": "task-1",
            "title": "Write report",
            "startTime": "2026-03-02T09:00:00+01:00"
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), value.as_object()) {
            base.extend(extra.clone());
        }
        SyncableTask::try_from(record(base)).unwrap()
    }

    #[test]
    fn test_color_category() {
        let completed_high = task(json!({"status": "completed", "priority": "high"}));
        assert_eq!(color_id(&completed_high), "8");
        let completed_low = task(json!({"status": "completed", "priority": "low"}));
        assert_eq!(color_id(&completed_low), "8");
        assert_eq!(color_id(&task(json!({"status": "pending", "priority": "high"}))), "11");
        assert_eq!(color_id(&task(json!({"status": "pending", "priority": "medium"}))), "6");
        assert_eq!(color_id(&task(json!({"status": "pending", "priority": "low"}))), "2");
        assert_eq!(color_id(&task(json!({}))), "1");
        assert_eq!(color_id(&task(json!({"priority": "urgent"}))), "1");
    }

    #[test]
    fn test_reminders_disabled_uses_defaults() {
        let payload = build_event_payload(&task(json!({"remindersEnabled": false})), "UTC");
        assert!(payload.reminders.use_default);
        assert!(payload.reminders.overrides.is_empty());

        let body = serde_json::to_value(&payload).unwrap();
        assert_eq!(body["reminders"], json!({"useDefault": true, "overrides": []}));
    }

    #[test]
    fn test_reminders_enabled_single_popup() {
        let payload = build_event_payload(
            &task(json!({"remindersEnabled": true, "reminderLeadMinutes": 30})),
            "UTC",
        );
        assert_eq!(
            serde_json::to_value(&payload.reminders).unwrap(),
            json!({"useDefault": false, "overrides": [{"method": "popup", "minutes": 30}]})
        );
    }

    #[test]
    fn test_end_defaults_to_one_hour() {
        let payload = build_event_payload(&task(json!({})), "Europe/Paris");
        assert_eq!(payload.start.date_time, "2026-03-02T09:00:00+01:00");
        assert_eq!(payload.end.date_time, "2026-03-02T10:00:00+01:00");
        assert_eq!(payload.end.time_zone, "Europe/Paris");
    }

    #[test]
    fn test_explicit_end_and_verbatim_text() {
        let payload = build_event_payload(
            &task(json!({
                "description": "  keep *exact* text ",
                "endTime": "2026-03-02T11:30:00+01:00"
            })),
            "UTC",
        );
        assert_eq!(payload.summary, "Write report");
        assert_eq!(payload.description.as_deref(), Some("  keep *exact* text "));
        assert_eq!(payload.end.date_time, "2026-03-02T11:30:00+01:00");

        let body = serde_json::to_value(&payload).unwrap();
        assert_eq!(body["colorId"], "1");
        assert_eq!(body["start"]["timeZone"], "UTC");
    }

    #[test]
    fn test_record_validation() {
        assert!(SyncableTask::try_from(record(json!({"title": "x", "startTime": "2026-01-01T00:00:00Z"}))).is_err());
        assert!(SyncableTask::try_from(record(json!({"id": "1", "startTime": "2026-01-01T00:00:00Z"}))).is_err());
        assert!(SyncableTask::try_from(record(json!({"id": "1", "title": "x"}))).is_err());
        assert!(SyncableTask::try_from(record(json!({"id": "1", "title": "x", "startTime": "tomorrow"}))).is_err());
    }

    #[test]
    fn test_record_defaults() {
        let t = task(json!({"unknownField": 42}));
        assert!(!t.sync_enabled);
        assert!(!t.reminders_enabled);
        assert_eq!(t.reminder_lead_minutes, 30);
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.priority, None);
    }
}
