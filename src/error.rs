use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Google Calendar is not connected")]
    NotAuthenticated,

    #[error("Google Calendar session expired, please reconnect")]
    ReauthenticationRequired,

    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Calendar sync failed: {0}")]
    SyncFailed(String),

    #[error("Missing authorization code")]
    MissingAuthorizationCode,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Error answered by the OAuth provider, forwarded as-is by the token proxy.
    #[error("Provider error ({status}): {description}")]
    Provider { status: u16, description: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Token-layer failures: the user has to (re)connect their calendar.
    pub fn requires_authentication(&self) -> bool {
        matches!(
            self,
            AppError::NotAuthenticated | AppError::ReauthenticationRequired
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotAuthenticated | AppError::ReauthenticationRequired => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            AppError::MissingAuthorizationCode | AppError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, self.to_string()),
            AppError::Provider {
                status,
                description,
            } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                description.clone(),
            ),
            AppError::ExchangeFailed(_) | AppError::SyncFailed(_) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            AppError::RequestError(_) => (StatusCode::BAD_GATEWAY, "Upstream error".to_string()),
            AppError::Storage(_) | AppError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_status_is_forwarded() {
        let response = AppError::Provider {
            status: 400,
            description: "invalid_grant".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_token_errors_map_to_unauthorized() {
        assert_eq!(
            AppError::ReauthenticationRequired.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert!(AppError::NotAuthenticated.requires_authentication());
        assert!(!AppError::SyncFailed("boom".into()).requires_authentication());
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let response = AppError::Storage("disk full at /var/lib".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
