//! Two-tier persistence for the Google OAuth token set.
//!
//! The durable tier holds the access token, refresh token and absolute expiry
//! under separate keys. The fast tier mirrors the whole set as one JSON value
//! and is consulted first while its expiry is in the future.

use crate::{
    error::{AppError, Result},
    storage::KvStore,
    types::{OAuthTokenSet, TokenGrant},
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

pub const ACCESS_TOKEN_KEY: &str = "google_access_token";
pub const REFRESH_TOKEN_KEY: &str = "google_refresh_token";
pub const EXPIRES_AT_KEY: &str = "google_token_expires_at";
pub const CACHE_KEY: &str = "google_token_cache";

#[derive(Clone)]
pub struct TokenStore {
    durable: Arc<dyn KvStore>,
    cache: Arc<dyn KvStore>,
}

impl TokenStore {
    pub fn new(durable: Arc<dyn KvStore>, cache: Arc<dyn KvStore>) -> Self {
        Self { durable, cache }
    }

    pub fn save(&self, tokens: &OAuthTokenSet) -> Result<()> {
        match &tokens.access_token {
            Some(token) => self.durable.set(ACCESS_TOKEN_KEY, token)?,
            None => self.durable.remove(ACCESS_TOKEN_KEY)?,
        }
        match &tokens.refresh_token {
            Some(token) => self.durable.set(REFRESH_TOKEN_KEY, token)?,
            None => self.durable.remove(REFRESH_TOKEN_KEY)?,
        }
        match tokens.expires_at {
            Some(expires_at) => self
                .durable
                .set(EXPIRES_AT_KEY, &expires_at.timestamp_millis().to_string())?,
            None => self.durable.remove(EXPIRES_AT_KEY)?,
        }

        let cached = serde_json::to_string(tokens)
            .map_err(|e| AppError::Storage(format!("serialize tokens: {}", e)))?;
        self.cache.set(CACHE_KEY, &cached)?;
        debug!("Saved Google token set (expires at {:?})", tokens.expires_at);
        Ok(())
    }

    /// Persist a token endpoint response, turning its relative `expires_in`
    /// into an absolute expiry. `fallback_refresh` is kept when the response
    /// carries no refresh token of its own.
    pub fn save_grant(
        &self,
        grant: &TokenGrant,
        fallback_refresh: Option<String>,
    ) -> Result<OAuthTokenSet> {
        let expires_at = grant
            .expires_in
            .checked_mul(1000)
            .and_then(|ms| Utc::now().timestamp_millis().checked_add(ms))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| {
                AppError::ExchangeFailed(format!("expires_in out of range: {}", grant.expires_in))
            })?;
        let tokens = OAuthTokenSet {
            access_token: Some(grant.access_token.clone()),
            refresh_token: grant.refresh_token.clone().or(fallback_refresh),
            expires_at: Some(expires_at),
        };
        self.save(&tokens)?;
        Ok(tokens)
    }

    pub fn load(&self) -> Result<Option<OAuthTokenSet>> {
        let now = Utc::now();

        if let Some(cached) = self.load_cached()? {
            if cached.expires_at.is_some_and(|expires_at| expires_at > now) {
                return Ok(Some(cached));
            }
        }

        let access_token = self.durable.get(ACCESS_TOKEN_KEY)?;
        let refresh_token = self.durable.get(REFRESH_TOKEN_KEY)?;
        let expires_at = self
            .durable
            .get(EXPIRES_AT_KEY)?
            .and_then(|raw| parse_millis(&raw));

        let stored = OAuthTokenSet {
            access_token,
            refresh_token,
            expires_at,
        };

        if stored.has_valid_access_token(now) {
            let cached = serde_json::to_string(&stored)
                .map_err(|e| AppError::Storage(format!("serialize tokens: {}", e)))?;
            self.cache.set(CACHE_KEY, &cached)?;
            return Ok(Some(stored));
        }

        if stored.refresh_token.is_some() {
            return Ok(Some(OAuthTokenSet {
                access_token: None,
                refresh_token: stored.refresh_token,
                expires_at: None,
            }));
        }

        if stored.access_token.is_some() {
            // Expired and not renewable; callers surface this as a reauthentication.
            return Ok(Some(stored));
        }

        Ok(None)
    }

    pub fn clear(&self) -> Result<()> {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, EXPIRES_AT_KEY] {
            self.durable.remove(key)?;
        }
        self.cache.remove(CACHE_KEY)?;
        debug!("Cleared Google token set");
        Ok(())
    }

    fn load_cached(&self) -> Result<Option<OAuthTokenSet>> {
        let Some(raw) = self.cache.get(CACHE_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(tokens) => Ok(Some(tokens)),
            Err(e) => {
                warn!("Discarding unreadable token cache: {}", e);
                self.cache.remove(CACHE_KEY)?;
                Ok(None)
            }
        }
    }
}

fn parse_millis(raw: &str) -> Option<DateTime<Utc>> {
    let millis = raw.trim().parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}
