use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access/refresh token pair as the app side holds it.
///
/// Every field is optional because the durable tier can legitimately hold a
/// refresh token without a live access token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthTokenSet {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthTokenSet {
    pub fn has_valid_access_token(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.expires_at) {
            (Some(token), Some(expires_at)) => !token.is_empty() && expires_at > now,
            _ => false,
        }
    }

    /// A valid access token, or a refresh token able to mint one.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.has_valid_access_token(now)
            || self
                .refresh_token
                .as_deref()
                .is_some_and(|token| !token.is_empty())
    }
}

/// Token endpoint response body (authorization code or refresh grant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Form body posted to the provider's token endpoint.
#[derive(Debug, Serialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Provider error payload (`{"error": "...", "error_description": "..."}`).
#[derive(Debug, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    pub error_description: Option<String>,
}

/// Query parameters on the OAuth redirect back to us.
#[derive(Debug, Deserialize)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Saved right before redirecting to the provider, consumed on return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthHandshakeState {
    pub state: String,
    pub redirect_target: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}
