//! Server-side token endpoints. The client secret never leaves this side.

use crate::{
    error::{AppError, Result},
    handshake::redirect_uri,
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct ExchangeTokenRequest {
    pub code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RevokeTokenRequest {
    pub token: Option<String>,
}

/// Unreadable bodies are treated like bodies missing the field.
fn body_or_default<T: Default>(body: std::result::Result<Json<T>, JsonRejection>) -> T {
    match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!("Unreadable token proxy request body: {}", rejection);
            T::default()
        }
    }
}

fn require(value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("{} is required", field)))
}

pub async fn exchange_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Json<ExchangeTokenRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let code = require(body_or_default(body).code, "code")?;

    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    let redirect = redirect_uri(origin, &state.config.production_origin);
    debug!("Proxying code exchange for redirect_uri={}", redirect);

    let grant = state.oauth_client.exchange_code(&code, &redirect).await?;
    info!("Authorization code exchanged");
    Ok(Json(grant))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    body: std::result::Result<Json<RefreshTokenRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let refresh_token = require(body_or_default(body).refresh_token, "refreshToken")?;
    let grant = state.oauth_client.refresh(&refresh_token).await?;
    Ok(Json(grant))
}

pub async fn revoke_token(
    State(state): State<AppState>,
    body: std::result::Result<Json<RevokeTokenRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let token = require(body_or_default(body).token, "token")?;
    state.oauth_client.revoke(&token).await?;
    Ok(Json(json!({ "revoked": true })))
}

pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}
