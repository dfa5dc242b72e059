//! Google OAuth authorization-code handshake.
//!
//! `begin_handshake` records a random `state`, drops whatever session we hold
//! and produces the consent URL. `complete_handshake` consumes the recorded
//! state, exchanges the returned code and stores the tokens.

use crate::{
    config::Config,
    error::{AppError, Result},
    exchanger::TokenExchanger,
    storage::KvStore,
    token_manager::TokenLifecycleManager,
    types::{OAuthHandshakeState, OAuthTokenSet},
};
use anyhow::anyhow;
use axum::http::{header, HeaderMap};
use base64::Engine;
use chrono::{Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const CALLBACK_PATH: &str = "/auth/google/callback";
pub const HANDSHAKE_KEY: &str = "google_oauth_handshake";
const HANDSHAKE_MAX_AGE_MINUTES: i64 = 10;

pub fn generate_state() -> String {
    let random_bytes: Vec<u8> = (0..64).map(|_| rand::thread_rng().gen()).collect();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Redirect URI registered for `origin`, or for `fallback` when the origin is
/// missing or not an http(s) URL.
pub fn redirect_uri(origin: Option<&str>, fallback: &str) -> String {
    let base = origin
        .map(|o| o.trim().trim_end_matches('/'))
        .filter(|o| {
            url::Url::parse(o)
                .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
                .unwrap_or(false)
        })
        .unwrap_or_else(|| fallback.trim_end_matches('/'));
    format!("{}{}", base, CALLBACK_PATH)
}

/// Origin the request was made from: the `Origin` header, else the
/// (possibly proxied) `Host`.
pub fn request_origin(headers: &HeaderMap) -> Option<String> {
    if let Some(origin) = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && *v != "null")
    {
        return Some(origin.to_string());
    }

    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())?;
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    Some(format!("{}://{}", proto, host))
}

/// Only same-site relative paths are accepted as post-login targets.
fn sanitize_redirect_target(target: &str) -> String {
    if target.starts_with('/') && !target.starts_with("//") && !target.contains('\\') {
        target.to_string()
    } else {
        "/".to_string()
    }
}

#[derive(Debug)]
pub struct HandshakeOutcome {
    pub tokens: OAuthTokenSet,
    /// False when the returned `state` did not match the recorded one.
    pub state_verified: bool,
    pub redirect_target: String,
}

pub struct HandshakeController {
    client_id: String,
    authorize_url: String,
    scopes: String,
    fallback_origin: String,
    durable: Arc<dyn KvStore>,
    manager: Arc<TokenLifecycleManager>,
    exchanger: Arc<dyn TokenExchanger>,
}

impl HandshakeController {
    pub fn new(
        config: &Config,
        durable: Arc<dyn KvStore>,
        manager: Arc<TokenLifecycleManager>,
        exchanger: Arc<dyn TokenExchanger>,
    ) -> Self {
        Self {
            client_id: config.client_id.clone(),
            authorize_url: config.authorize_url.clone(),
            scopes: config.scopes.clone(),
            fallback_origin: config.production_origin.clone(),
            durable,
            manager,
            exchanger,
        }
    }

    /// Returns the provider authorization URL the user must be sent to.
    pub async fn begin_handshake(
        &self,
        redirect_target: &str,
        origin: Option<&str>,
    ) -> Result<String> {
        let oauth_state = generate_state();
        let record = OAuthHandshakeState {
            state: oauth_state.clone(),
            redirect_target: sanitize_redirect_target(redirect_target),
            created_at: Utc::now(),
        };
        let serialized = serde_json::to_string(&record)
            .map_err(|e| AppError::Storage(format!("serialize handshake: {}", e)))?;
        self.durable.set(HANDSHAKE_KEY, &serialized)?;

        // Start from a clean slate so consent reflects the account being connected.
        if let Err(e) = self.manager.sign_out().await {
            warn!("Could not drop previous Google session: {}", e);
        }

        let redirect = redirect_uri(origin, &self.fallback_origin);
        let auth_params = vec![
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect.as_str()),
            ("response_type", "code"),
            ("scope", self.scopes.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", oauth_state.as_str()),
        ];
        let query = serde_urlencoded::to_string(auth_params)
            .map_err(|e| AppError::InternalError(anyhow!("encode authorize params: {}", e)))?;
        let auth_url = format!("{}?{}", self.authorize_url, query);

        info!("Starting Google OAuth handshake");
        debug!("Authorization redirect_uri={}", redirect);
        Ok(auth_url)
    }

    pub async fn complete_handshake(
        &self,
        code: Option<String>,
        returned_state: Option<&str>,
        origin: Option<&str>,
    ) -> Result<HandshakeOutcome> {
        let recorded = self.take_recorded_state();
        let state_verified = match (&recorded, returned_state) {
            (Some(record), Some(returned)) if record.state == returned => {
                if Utc::now() - record.created_at > Duration::minutes(HANDSHAKE_MAX_AGE_MINUTES) {
                    warn!("OAuth state matched but handshake is stale; continuing unverified");
                    false
                } else {
                    true
                }
            }
            (None, _) => {
                warn!("No recorded OAuth handshake state; continuing unverified");
                false
            }
            _ => {
                warn!("OAuth state mismatch; continuing unverified");
                false
            }
        };

        let code = code
            .filter(|c| !c.trim().is_empty())
            .ok_or(AppError::MissingAuthorizationCode)?;

        let grant = self
            .exchanger
            .exchange_code(&code, origin)
            .await
            .map_err(|e| match e {
                AppError::ExchangeFailed(_) => e,
                other => AppError::ExchangeFailed(other.to_string()),
            })?;
        let tokens = self.manager.store_grant(&grant)?;

        Ok(HandshakeOutcome {
            tokens,
            state_verified,
            redirect_target: recorded
                .map(|r| r.redirect_target)
                .unwrap_or_else(|| "/".to_string()),
        })
    }

    fn take_recorded_state(&self) -> Option<OAuthHandshakeState> {
        let raw = match self.durable.get(HANDSHAKE_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Could not read OAuth handshake state: {}", e);
                return None;
            }
        };
        if let Err(e) = self.durable.remove(HANDSHAKE_KEY) {
            warn!("Could not delete OAuth handshake state: {}", e);
        }
        serde_json::from_str(&raw)
            .map_err(|e| warn!("Unreadable OAuth handshake state: {}", e))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use crate::token_manager::tests::{memory_token_store, valid_tokens, FakeExchanger};
    use axum::http::HeaderValue;
    use std::sync::atomic::Ordering;

    fn test_config() -> Config {
        Config::from_lookup(|key| match key {
            "GOOGLE_CLIENT_ID" => Some("client-123".into()),
            "PRODUCTION_ORIGIN" => Some("https://tasks.example.com".into()),
            _ => None,
        })
        .unwrap()
    }

    struct Fixture {
        controller: HandshakeController,
        manager: Arc<TokenLifecycleManager>,
        exchanger: Arc<FakeExchanger>,
        durable: Arc<MemoryKvStore>,
    }

    fn fixture() -> Fixture {
        let exchanger = Arc::new(FakeExchanger::default());
        let manager = Arc::new(TokenLifecycleManager::new(
            memory_token_store(),
            exchanger.clone(),
        ));
        let durable = Arc::new(MemoryKvStore::new());
        let controller = HandshakeController::new(
            &test_config(),
            durable.clone(),
            manager.clone(),
            exchanger.clone(),
        );
        Fixture {
            controller,
            manager,
            exchanger,
            durable,
        }
    }

    fn query_param(url: &str, name: &str) -> Option<String> {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    #[tokio::test]
    async fn test_begin_builds_offline_consent_url() {
        let f = fixture();
        let url = f
            .controller
            .begin_handshake("/tasks", Some("http://localhost:5173"))
            .await
            .unwrap();

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert_eq!(query_param(&url, "client_id").as_deref(), Some("client-123"));
        assert_eq!(
            query_param(&url, "redirect_uri").as_deref(),
            Some("http://localhost:5173/auth/google/callback")
        );
        assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(query_param(&url, "access_type").as_deref(), Some("offline"));
        assert_eq!(query_param(&url, "prompt").as_deref(), Some("consent"));

        let recorded: OAuthHandshakeState =
            serde_json::from_str(&f.durable.get(HANDSHAKE_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(query_param(&url, "state"), Some(recorded.state));
        assert_eq!(recorded.redirect_target, "/tasks");
    }

    #[tokio::test]
    async fn test_begin_drops_existing_session() {
        let f = fixture();
        f.manager.token_store().save(&valid_tokens("old")).unwrap();

        f.controller.begin_handshake("/", None).await.unwrap();
        assert_eq!(f.exchanger.revoke_calls.load(Ordering::SeqCst), 1);
        assert!(f.manager.token_store().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_with_matching_state() {
        let f = fixture();
        let url = f.controller.begin_handshake("/calendar", None).await.unwrap();
        let state = query_param(&url, "state").unwrap();

        let outcome = f
            .controller
            .complete_handshake(Some("4/code".into()), Some(&state), None)
            .await
            .unwrap();
        assert!(outcome.state_verified);
        assert_eq!(outcome.redirect_target, "/calendar");
        assert_eq!(outcome.tokens.access_token.as_deref(), Some("access-for-4/code"));
        assert!(f.manager.last_known_connected());
        assert!(f.durable.get(HANDSHAKE_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_mismatch_degrades_gracefully() {
        let f = fixture();
        f.controller.begin_handshake("/", None).await.unwrap();

        let outcome = f
            .controller
            .complete_handshake(Some("4/code".into()), Some("forged"), None)
            .await
            .unwrap();
        assert!(!outcome.state_verified);
        assert!(f.manager.token_store().load().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_code() {
        let f = fixture();
        let err = f
            .controller
            .complete_handshake(None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingAuthorizationCode));
        assert_eq!(f.exchanger.exchange_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exchange_failure_propagates() {
        let f = fixture();
        let err = f
            .controller
            .complete_handshake(Some("bad".into()), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExchangeFailed(_)));
        assert!(f.manager.token_store().load().unwrap().is_none());
    }

    #[test]
    fn test_redirect_uri_derivation() {
        let fallback = "https://tasks.example.com";
        assert_eq!(
            redirect_uri(Some("http://localhost:3000/"), fallback),
            "http://localhost:3000/auth/google/callback"
        );
        assert_eq!(
            redirect_uri(None, fallback),
            "https://tasks.example.com/auth/google/callback"
        );
        assert_eq!(
            redirect_uri(Some("javascript:alert(1)"), fallback),
            "https://tasks.example.com/auth/google/callback"
        );
    }

    #[test]
    fn test_request_origin() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_origin(&headers), None);

        headers.insert(header::HOST, HeaderValue::from_static("localhost:4000"));
        assert_eq!(request_origin(&headers).as_deref(), Some("http://localhost:4000"));

        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("tasks.example.com"));
        assert_eq!(
            request_origin(&headers).as_deref(),
            Some("https://tasks.example.com")
        );

        headers.insert(header::ORIGIN, HeaderValue::from_static("http://localhost:5173"));
        assert_eq!(request_origin(&headers).as_deref(), Some("http://localhost:5173"));
    }

    #[test]
    fn test_redirect_target_sanitized() {
        assert_eq!(sanitize_redirect_target("/settings"), "/settings");
        assert_eq!(sanitize_redirect_target("//evil.example"), "/");
        assert_eq!(sanitize_redirect_target("https://evil.example"), "/");
    }

    #[test]
    fn test_generated_state_is_unique() {
        assert_ne!(generate_state(), generate_state());
        assert_eq!(generate_state().len(), 86);
    }
}
