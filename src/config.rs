use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_PRODUCTION_ORIGIN: &str = "https://taskflow.example.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub client_id: String,
    pub client_secret: String,
    pub production_origin: String,
    pub authorize_url: String,
    pub token_url: String,
    pub revoke_url: String,
    pub scopes: String,
    pub calendar_api_base: String,
    pub calendar_id: String,
    pub calendar_time_zone: String,
    pub token_proxy_url: String,
    pub data_dir: PathBuf,
    pub direct_exchange: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port: u16 = var("PORT", "4000").parse().context("Invalid PORT")?;

        let client_id = lookup("GOOGLE_CLIENT_ID")
            .filter(|id| !id.trim().is_empty())
            .context("GOOGLE_CLIENT_ID must be set")?;

        let production_origin = var("PRODUCTION_ORIGIN", DEFAULT_PRODUCTION_ORIGIN);
        url::Url::parse(&production_origin).context("Invalid PRODUCTION_ORIGIN")?;

        let token_proxy_url = var("TOKEN_PROXY_URL", &format!("http://127.0.0.1:{}", port));
        url::Url::parse(&token_proxy_url).context("Invalid TOKEN_PROXY_URL")?;

        let data_dir = lookup("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("taskcal-sync")
        });

        let direct_requested = var("GOOGLE_DIRECT_EXCHANGE", "false")
            .parse::<bool>()
            .context("Invalid GOOGLE_DIRECT_EXCHANGE")?;
        let direct_exchange = direct_requested && cfg!(feature = "dev-direct-exchange");
        if direct_requested && !direct_exchange {
            warn!("GOOGLE_DIRECT_EXCHANGE ignored: built without the dev-direct-exchange feature");
        }

        Ok(Self {
            port,
            client_id,
            client_secret: var("GOOGLE_CLIENT_SECRET", ""),
            production_origin: production_origin.trim_end_matches('/').to_string(),
            authorize_url: var(
                "OAUTH_AUTHORIZE_URL",
                "https://accounts.google.com/o/oauth2/v2/auth",
            ),
            token_url: var("OAUTH_TOKEN_URL", "https://oauth2.googleapis.com/token"),
            revoke_url: var("OAUTH_REVOKE_URL", "https://oauth2.googleapis.com/revoke"),
            scopes: var(
                "GOOGLE_SCOPES",
                "https://www.googleapis.com/auth/calendar.events",
            ),
            calendar_api_base: var(
                "CALENDAR_API_BASE",
                "https://www.googleapis.com/calendar/v3",
            ),
            calendar_id: var("CALENDAR_ID", "primary"),
            calendar_time_zone: var("CALENDAR_TIME_ZONE", "UTC"),
            token_proxy_url: token_proxy_url.trim_end_matches('/').to_string(),
            data_dir,
            direct_exchange,
        })
    }

    pub fn server_address(&self) -> SocketAddr {
        ([0, 0, 0, 0], self.port).into()
    }

    pub fn durable_store_path(&self) -> PathBuf {
        self.data_dir.join("storage.json")
    }
}
