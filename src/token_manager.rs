//! Hands out valid Google access tokens, refreshing them when needed.
//!
//! Callers never read the token store directly: they ask
//! [`TokenLifecycleManager::ensure_valid_access_token`] before each outbound
//! calendar call. Refreshes are serialised so concurrent callers that all see
//! an expired token share one refresh.

use crate::{
    error::{AppError, Result},
    exchanger::TokenExchanger,
    token_store::TokenStore,
    types::{OAuthTokenSet, TokenGrant},
};
use chrono::Utc;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct TokenLifecycleManager {
    store: TokenStore,
    exchanger: Arc<dyn TokenExchanger>,
    refresh_lock: Mutex<()>,
    connected: AtomicBool,
}

impl TokenLifecycleManager {
    pub fn new(store: TokenStore, exchanger: Arc<dyn TokenExchanger>) -> Self {
        let connected = matches!(store.load(), Ok(Some(tokens)) if tokens.is_usable(Utc::now()));
        Self {
            store,
            exchanger,
            refresh_lock: Mutex::new(()),
            connected: AtomicBool::new(connected),
        }
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.store
    }

    /// Connection state as last observed by this manager.
    pub fn last_known_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn ensure_valid_access_token(&self) -> Result<String> {
        let tokens = self.load_or_unauthenticated()?;

        if let Some(access_token) = valid_access_token(&tokens) {
            self.connected.store(true, Ordering::Relaxed);
            return Ok(access_token);
        }

        if tokens.refresh_token.is_none() {
            self.connected.store(false, Ordering::Relaxed);
            return Err(AppError::ReauthenticationRequired);
        }

        let _guard = self.refresh_lock.lock().await;
        let tokens = self.load_or_unauthenticated()?;
        if let Some(access_token) = valid_access_token(&tokens) {
            debug!("Access token was refreshed by a concurrent caller");
            return Ok(access_token);
        }
        self.refresh_locked(tokens).await
    }

    /// Refresh even though the stored token looks valid, e.g. after the
    /// calendar API rejected `rejected_token` with a 401.
    pub async fn force_refresh(&self, rejected_token: &str) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;
        let tokens = self.load_or_unauthenticated()?;

        if let Some(access_token) = valid_access_token(&tokens) {
            if access_token != rejected_token {
                debug!("Rejected token already replaced by a concurrent refresh");
                return Ok(access_token);
            }
        }
        self.refresh_locked(tokens).await
    }

    /// Persist the result of an authorization code exchange.
    pub fn store_grant(&self, grant: &TokenGrant) -> Result<OAuthTokenSet> {
        let previous_refresh = self
            .store
            .load()?
            .and_then(|tokens| tokens.refresh_token);
        let tokens = self.store.save_grant(grant, previous_refresh)?;
        self.connected.store(true, Ordering::Relaxed);
        info!("Stored new Google token set");
        Ok(tokens)
    }

    /// Drop the current session: best-effort revoke at the provider, then
    /// clear local tokens unconditionally.
    pub async fn sign_out(&self) -> Result<()> {
        let revocable = match self.store.load() {
            Ok(Some(tokens)) => tokens.refresh_token.or(tokens.access_token),
            Ok(None) => None,
            Err(e) => {
                warn!("Could not read tokens before sign-out: {}", e);
                None
            }
        };

        if let Some(token) = revocable {
            if let Err(e) = self.exchanger.revoke(&token).await {
                warn!("Token revoke failed, clearing local tokens anyway: {}", e);
            }
        }

        self.store.clear()?;
        self.connected.store(false, Ordering::Relaxed);
        info!("Signed out of Google Calendar");
        Ok(())
    }

    fn load_or_unauthenticated(&self) -> Result<OAuthTokenSet> {
        match self.store.load()? {
            Some(tokens) => Ok(tokens),
            None => {
                self.connected.store(false, Ordering::Relaxed);
                Err(AppError::NotAuthenticated)
            }
        }
    }

    /// Caller must hold `refresh_lock`.
    async fn refresh_locked(&self, tokens: OAuthTokenSet) -> Result<String> {
        let Some(refresh_token) = tokens.refresh_token else {
            self.connected.store(false, Ordering::Relaxed);
            return Err(AppError::ReauthenticationRequired);
        };

        debug!("Refreshing Google access token");
        match self.exchanger.refresh(&refresh_token).await {
            Ok(grant) => {
                let tokens = self.store.save_grant(&grant, Some(refresh_token))?;
                self.connected.store(true, Ordering::Relaxed);
                info!("Google access token refreshed");
                tokens
                    .access_token
                    .ok_or(AppError::ReauthenticationRequired)
            }
            Err(e) => {
                warn!("Token refresh failed, clearing stored tokens: {}", e);
                self.store.clear()?;
                self.connected.store(false, Ordering::Relaxed);
                Err(AppError::ReauthenticationRequired)
            }
        }
    }
}

fn valid_access_token(tokens: &OAuthTokenSet) -> Option<String> {
    if tokens.has_valid_access_token(Utc::now()) {
        tokens.access_token.clone()
    } else {
        None
    }
}
