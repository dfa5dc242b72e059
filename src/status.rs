use crate::token_manager::TokenLifecycleManager;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Derives "is Google Calendar connected" from stored tokens.
#[derive(Clone)]
pub struct ConnectionStatusReporter {
    manager: Arc<TokenLifecycleManager>,
}

impl ConnectionStatusReporter {
    pub fn new(manager: Arc<TokenLifecycleManager>) -> Self {
        Self { manager }
    }

    /// Fast read with no network call. Cannot see server-side revocation.
    pub fn is_connected(&self) -> bool {
        match self.manager.token_store().load() {
            Ok(Some(tokens)) => tokens.is_usable(Utc::now()),
            Ok(None) => false,
            Err(e) => {
                warn!("Could not read token store: {}", e);
                self.manager.last_known_connected()
            }
        }
    }

    /// Authoritative check: obtains a live access token, refreshing if needed.
    pub async fn verify(&self) -> bool {
        match self.manager.ensure_valid_access_token().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Connection check failed: {}", e);
                false
            }
        }
    }
}
