//! Server-side client for Google's OAuth token endpoints.
//!
//! This is the only component that sees the client secret. The token proxy
//! routes use it directly; the app side only reaches it through the proxy
//! (or in-process when built with `dev-direct-exchange`).

use crate::{
    config::Config,
    error::{AppError, Result},
    types::{TokenErrorResponse, TokenGrant, TokenRequest},
};
use anyhow::anyhow;
use axum::http::header;
use serde_json::Value;
use tracing::{debug, error, info};

const MAX_ERROR_LEN: usize = 240;

#[derive(Clone)]
pub struct GoogleOAuthClient {
    http_client: reqwest::Client,
    client_id: String,
    client_secret: String,
    token_url: String,
    revoke_url: String,
}

impl GoogleOAuthClient {
    pub fn new(http_client: reqwest::Client, config: &Config) -> Self {
        Self {
            http_client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token_url: config.token_url.clone(),
            revoke_url: config.revoke_url.clone(),
        }
    }

    /// Exchange an authorization code. Returns the provider's JSON untouched.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Value> {
        let request = TokenRequest {
            grant_type: "authorization_code".to_string(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            code: Some(code.to_string()),
            redirect_uri: Some(redirect_uri.to_string()),
            refresh_token: None,
        };
        debug!("Exchanging authorization code (redirect_uri={})", redirect_uri);
        self.token_request(&request).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Value> {
        let request = TokenRequest {
            grant_type: "refresh_token".to_string(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            code: None,
            redirect_uri: None,
            refresh_token: Some(refresh_token.to_string()),
        };
        debug!("Refreshing Google access token");
        self.token_request(&request).await
    }

    pub async fn revoke(&self, token: &str) -> Result<()> {
        let response = self
            .http_client
            .post(&self.revoke_url)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| AppError::InternalError(anyhow!("revoke request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider {
                status,
                description: summarize_provider_error(&body),
            });
        }

        info!("Revoked Google token");
        Ok(())
    }

    async fn token_request(&self, request: &TokenRequest) -> Result<Value> {
        let response = self
            .http_client
            .post(&self.token_url)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(request)
            .send()
            .await
            .map_err(|e| AppError::InternalError(anyhow!("token request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::InternalError(anyhow!("token response unreadable: {}", e)))?;

        if !status.is_success() {
            error!("Token endpoint returned {}: {}", status, body);
            return Err(AppError::Provider {
                status: status.as_u16(),
                description: summarize_provider_error(&body),
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| AppError::InternalError(anyhow!("token response is not JSON: {}", e)))
    }
}

/// Narrow a raw token endpoint body into a [`TokenGrant`].
pub fn parse_grant(body: Value) -> Result<TokenGrant> {
    serde_json::from_value(body)
        .map_err(|e| AppError::ExchangeFailed(format!("Failed to parse token response: {}", e)))
}

/// Short, human-readable form of a provider error body.
pub fn summarize_provider_error(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "unknown provider error".to_string();
    }

    if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(trimmed) {
        return match err.error_description {
            Some(desc) if !desc.is_empty() => desc,
            _ => err.error,
        };
    }

    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
        if let Some(message) = obj.get("error").and_then(|e| e.get("message")) {
            if let Some(message) = message.as_str() {
                return truncate(message);
            }
        }
        if let Some(message) = obj.get("error").and_then(Value::as_str) {
            return truncate(message);
        }
    }

    truncate(trimmed)
}

fn truncate(message: &str) -> String {
    let mut out = message.replace(['\n', '\r'], " ");
    if out.len() > MAX_ERROR_LEN {
        let mut cut = MAX_ERROR_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out.push_str("...");
    }
    out
}
