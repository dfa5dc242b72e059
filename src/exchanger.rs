//! How the app side turns codes and refresh tokens into access tokens.
//!
//! Deployed builds only have [`ProxyExchanger`], which talks to the token
//! proxy routes and never holds the client secret. `DirectExchanger` calls
//! Google in-process and only exists with the `dev-direct-exchange` feature.

use crate::{
    error::{AppError, Result},
    oauth_client::summarize_provider_error,
    types::TokenGrant,
};
use async_trait::async_trait;
use axum::http::header;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};

#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// `origin` is the app origin the user came from; the redirect URI is
    /// derived from it.
    async fn exchange_code(&self, code: &str, origin: Option<&str>) -> Result<TokenGrant>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;

    async fn revoke(&self, token: &str) -> Result<()>;
}

pub struct ProxyExchanger {
    http_client: reqwest::Client,
    base_url: String,
}

impl ProxyExchanger {
    pub fn new(http_client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        route: &str,
        body: &T,
        origin: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, route);
        debug!("Calling token proxy: {}", url);

        let mut request = self.http_client.post(&url).json(body);
        if let Some(origin) = origin {
            request = request.header(header::ORIGIN, origin);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::ExchangeFailed(format!("token proxy unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Token proxy {} answered {}: {}", route, status, body);
            return Err(AppError::ExchangeFailed(summarize_provider_error(&body)));
        }

        Ok(response)
    }

    async fn grant(response: reqwest::Response) -> Result<TokenGrant> {
        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| AppError::ExchangeFailed(format!("Failed to parse token response: {}", e)))
    }
}

#[async_trait]
impl TokenExchanger for ProxyExchanger {
    async fn exchange_code(&self, code: &str, origin: Option<&str>) -> Result<TokenGrant> {
        let response = self
            .post("/api/google/exchange-token", &json!({ "code": code }), origin)
            .await?;
        Self::grant(response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let response = self
            .post(
                "/api/google/refresh-token",
                &json!({ "refreshToken": refresh_token }),
                None,
            )
            .await?;
        Self::grant(response).await
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        self.post("/api/google/revoke-token", &json!({ "token": token }), None)
            .await?;
        Ok(())
    }
}

#[cfg(feature = "dev-direct-exchange")]
pub use direct::DirectExchanger;

#[cfg(feature = "dev-direct-exchange")]
mod direct {
    use super::*;
    use crate::{
        handshake::redirect_uri,
        oauth_client::{parse_grant, GoogleOAuthClient},
    };
    use tracing::warn;

    /// Exchanges tokens with Google from the app side. Local development only.
    pub struct DirectExchanger {
        client: GoogleOAuthClient,
        fallback_origin: String,
    }

    impl DirectExchanger {
        pub fn new(client: GoogleOAuthClient, fallback_origin: impl Into<String>) -> Self {
            warn!("Direct token exchange enabled; the client secret is held by the app side");
            Self {
                client,
                fallback_origin: fallback_origin.into(),
            }
        }
    }

    fn provider_error(err: AppError) -> AppError {
        match err {
            AppError::Provider { description, .. } => AppError::ExchangeFailed(description),
            other => other,
        }
    }

    #[async_trait]
    impl TokenExchanger for DirectExchanger {
        async fn exchange_code(&self, code: &str, origin: Option<&str>) -> Result<TokenGrant> {
            let redirect = redirect_uri(origin, &self.fallback_origin);
            let body = self
                .client
                .exchange_code(code, &redirect)
                .await
                .map_err(provider_error)?;
            parse_grant(body)
        }

        async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
            let body = self
                .client
                .refresh(refresh_token)
                .await
                .map_err(provider_error)?;
            parse_grant(body)
        }

        async fn revoke(&self, token: &str) -> Result<()> {
            self.client.revoke(token).await.map_err(provider_error)
        }
    }
}
