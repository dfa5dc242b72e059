use crate::{
    error::{AppError, Result},
    handshake::request_origin,
    types::OAuthCallback,
    AppState,
};
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

const SETTINGS_PATH: &str = "/settings";

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub redirect: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    #[serde(default)]
    pub verify: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

// Start connecting Google Calendar
pub async fn connect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
) -> Result<impl IntoResponse> {
    let origin = request_origin(&headers);
    let auth_url = state
        .handshake
        .begin_handshake(params.redirect.as_deref().unwrap_or("/"), origin.as_deref())
        .await?;
    Ok(Redirect::to(&auth_url))
}

// Google redirects back here after consent
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<OAuthCallback>,
) -> Redirect {
    if let Some(error) = params.error {
        error!("OAuth error: {} - {:?}", error, params.error_description);
        return failure_redirect(&consent_error_message(&error));
    }

    let origin = request_origin(&headers);
    let outcome = match state
        .handshake
        .complete_handshake(params.code, params.state.as_deref(), origin.as_deref())
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Google Calendar connection failed: {}", e);
            return failure_redirect(&user_message(&e));
        }
    };

    if !outcome.state_verified {
        warn!("Connected Google Calendar without a verified OAuth state");
    }

    // The tokens are stored; make sure they actually work before reporting success.
    if !state.status.verify().await {
        return failure_redirect(
            "Google Calendar was connected but could not be reached. Please try again.",
        );
    }

    info!("Google Calendar connected");
    Redirect::to(&with_query(&outcome.redirect_target, "calendar=connected"))
}

// Check connection status
pub async fn status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Json<StatusResponse> {
    let connected = state.status.is_connected();
    let verified = if params.verify {
        Some(state.status.verify().await)
    } else {
        None
    };
    debug!("Connection status: connected={} verified={:?}", connected, verified);

    Json(StatusResponse {
        connected: verified.unwrap_or(connected),
        verified,
    })
}

// Disconnect Google Calendar
pub async fn logout(State(state): State<AppState>) -> Result<impl IntoResponse> {
    state.manager.sign_out().await?;
    Ok(Json(json!({ "message": "Google Calendar disconnected" })))
}

fn consent_error_message(error: &str) -> String {
    match error {
        "access_denied" => "Google Calendar access was not granted.".to_string(),
        other => format!("Google sign-in failed: {}", other),
    }
}

fn user_message(err: &AppError) -> String {
    match err {
        AppError::MissingAuthorizationCode => {
            "Google did not return an authorization code.".to_string()
        }
        AppError::ExchangeFailed(detail) => format!("Google rejected the sign-in: {}", detail),
        _ => "Could not connect Google Calendar. Please try again.".to_string(),
    }
}

fn with_query(target: &str, query: &str) -> String {
    let separator = if target.contains('?') { '&' } else { '?' };
    format!("{}{}{}", target, separator, query)
}

fn failure_redirect(message: &str) -> Redirect {
    let query = serde_urlencoded::to_string([("calendar_error", message)])
        .unwrap_or_else(|_| "calendar_error=unknown".to_string());
    Redirect::to(&format!("{}?{}", SETTINGS_PATH, query))
}
