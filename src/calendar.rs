//! Google Calendar events API: create, update and delete one event.

use crate::{oauth_client::summarize_provider_error, task::EventPayload};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("calendar API rejected the access token")]
    Unauthorized,

    #[error("calendar event not found")]
    NotFound,

    #[error("calendar API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("calendar request failed: {0}")]
    Transport(String),
}

pub type CalendarResult<T> = std::result::Result<T, CalendarError>;

#[async_trait]
pub trait CalendarApi: Send + Sync {
    /// Returns the id of the created event.
    async fn create_event(&self, access_token: &str, event: &EventPayload)
        -> CalendarResult<String>;

    async fn update_event(
        &self,
        access_token: &str,
        event_id: &str,
        event: &EventPayload,
    ) -> CalendarResult<()>;

    async fn delete_event(&self, access_token: &str, event_id: &str) -> CalendarResult<()>;
}

#[derive(Debug, Deserialize)]
struct CreatedEvent {
    id: String,
}

pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    api_base: String,
    calendar_id: String,
}

impl GoogleCalendarClient {
    pub fn new(
        http_client: reqwest::Client,
        api_base: impl Into<String>,
        calendar_id: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            api_base: api_base.into(),
            calendar_id: calendar_id.into(),
        }
    }

    fn events_url(&self, event_id: Option<&str>) -> CalendarResult<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| CalendarError::Transport(format!("invalid calendar API base: {}", e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| CalendarError::Transport("calendar API base cannot be a base".into()))?;
            segments
                .pop_if_empty()
                .push("calendars")
                .push(&self.calendar_id)
                .push("events");
            if let Some(event_id) = event_id {
                segments.push(event_id);
            }
        }
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> CalendarResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::UNAUTHORIZED => Err(CalendarError::Unauthorized),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(CalendarError::NotFound),
            _ => {
                let body = response.text().await.unwrap_or_default();
                error!("Calendar API returned {}: {}", status, body);
                Err(CalendarError::Api {
                    status: status.as_u16(),
                    message: summarize_provider_error(&body),
                })
            }
        }
    }
}

fn transport(e: reqwest::Error) -> CalendarError {
    CalendarError::Transport(e.to_string())
}

#[async_trait]
impl CalendarApi for GoogleCalendarClient {
    async fn create_event(
        &self,
        access_token: &str,
        event: &EventPayload,
    ) -> CalendarResult<String> {
        let url = self.events_url(None)?;
        debug!("Creating calendar event: {}", url);

        let response = self
            .http_client
            .post(url)
            .bearer_auth(access_token)
            .json(event)
            .send()
            .await
            .map_err(transport)?;
        let created: CreatedEvent = Self::check(response)
            .await?
            .json()
            .await
            .map_err(transport)?;
        Ok(created.id)
    }

    async fn update_event(
        &self,
        access_token: &str,
        event_id: &str,
        event: &EventPayload,
    ) -> CalendarResult<()> {
        let url = self.events_url(Some(event_id))?;
        debug!("Updating calendar event: {}", url);

        let response = self
            .http_client
            .put(url)
            .bearer_auth(access_token)
            .json(event)
            .send()
            .await
            .map_err(transport)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_event(&self, access_token: &str, event_id: &str) -> CalendarResult<()> {
        let url = self.events_url(Some(event_id))?;
        debug!("Deleting calendar event: {}", url);

        let response = self
            .http_client
            .delete(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport)?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{EventDateTime, EventReminders};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> EventPayload {
        let at = |t: &str| EventDateTime {
            date_time: t.to_string(),
            time_zone: "UTC".to_string(),
        };
        EventPayload {
            summary: "Standup".into(),
            description: None,
            start: at("2026-03-02T09:00:00+00:00"),
            end: at("2026-03-02T10:00:00+00:00"),
            color_id: "11".into(),
            reminders: EventReminders {
                use_default: true,
                overrides: vec![],
            },
        }
    }

    fn client(server: &MockServer, calendar_id: &str) -> GoogleCalendarClient {
        GoogleCalendarClient::new(
            reqwest::Client::new(),
            format!("{}/calendar/v3", server.uri()),
            calendar_id,
        )
    }

    #[tokio::test]
    async fn test_create_event_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .and(header("authorization", "Bearer ya29"))
            .and(body_partial_json(serde_json::json!({
                "summary": "Standup",
                "colorId": "11"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "evt123"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server, "primary")
            .create_event("ya29", &payload())
            .await
            .unwrap();
        assert_eq!(id, "evt123");
    }

    #[test]
    fn test_calendar_id_is_escaped() {
        let api = GoogleCalendarClient::new(
            reqwest::Client::new(),
            "https://www.googleapis.com/calendar/v3/",
            "en.usa#holiday@group.v.calendar.google.com",
        );
        assert_eq!(
            api.events_url(Some("evt1")).unwrap().as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/en.usa%23holiday@group.v.calendar.google.com/events/evt1"
        );
    }

    #[tokio::test]
    async fn test_update_puts_to_event_path() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/calendar/v3/calendars/primary/events/evt1"))
            .and(header("authorization", "Bearer ya29"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "evt1"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, "primary")
            .update_event("ya29", "evt1", &payload())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/calendar/v3/calendars/primary/events/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/calendar/v3/calendars/primary/events/gone"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/calendar/v3/calendars/primary/events/expired"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {"code": 403, "message": "Rate Limit Exceeded"}
            })))
            .mount(&server)
            .await;

        let api = client(&server, "primary");
        assert!(matches!(
            api.update_event("t", "missing", &payload()).await,
            Err(CalendarError::NotFound)
        ));
        assert!(matches!(
            api.delete_event("t", "gone").await,
            Err(CalendarError::NotFound)
        ));
        assert!(matches!(
            api.delete_event("t", "expired").await,
            Err(CalendarError::Unauthorized)
        ));
        match api.create_event("t", &payload()).await {
            Err(CalendarError::Api { status, message }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "Rate Limit Exceeded");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_succeeds_on_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/calendar/v3/calendars/primary/events/evt1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, "primary").delete_event("t", "evt1").await.unwrap();
    }
}
