use anyhow::Result;
use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod calendar;
mod config;
mod error;
mod exchanger;
mod handshake;
mod identity_map;
mod oauth_client;
mod reconciler;
mod status;
mod storage;
mod sync;
mod task;
mod token_manager;
mod token_proxy;
mod token_store;
mod types;

use crate::{
    calendar::{CalendarApi, GoogleCalendarClient},
    config::Config,
    exchanger::{ProxyExchanger, TokenExchanger},
    handshake::HandshakeController,
    identity_map::EventIdentityMap,
    oauth_client::GoogleOAuthClient,
    reconciler::CalendarEventReconciler,
    status::ConnectionStatusReporter,
    storage::{FileKvStore, KvStore, MemoryKvStore},
    token_manager::TokenLifecycleManager,
    token_store::TokenStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Holds the client secret; only the token proxy routes use it.
    pub oauth_client: Arc<GoogleOAuthClient>,
    pub manager: Arc<TokenLifecycleManager>,
    pub handshake: Arc<HandshakeController>,
    pub reconciler: Arc<CalendarEventReconciler>,
    pub status: ConnectionStatusReporter,
}

impl AppState {
    pub fn new(
        config: Config,
        http_client: reqwest::Client,
        durable: Arc<dyn KvStore>,
        exchanger: Arc<dyn TokenExchanger>,
        calendar: Arc<dyn CalendarApi>,
    ) -> Self {
        let token_store = TokenStore::new(durable.clone(), Arc::new(MemoryKvStore::new()));
        let manager = Arc::new(TokenLifecycleManager::new(token_store, exchanger.clone()));
        let handshake = Arc::new(HandshakeController::new(
            &config,
            durable.clone(),
            manager.clone(),
            exchanger,
        ));
        let reconciler = Arc::new(CalendarEventReconciler::new(
            manager.clone(),
            calendar,
            EventIdentityMap::new(durable),
            config.calendar_time_zone.clone(),
        ));

        Self {
            oauth_client: Arc::new(GoogleOAuthClient::new(http_client, &config)),
            status: ConnectionStatusReporter::new(manager.clone()),
            config: Arc::new(config),
            manager,
            handshake,
            reconciler,
        }
    }
}

#[cfg(feature = "dev-direct-exchange")]
fn build_exchanger(config: &Config, http_client: &reqwest::Client) -> Arc<dyn TokenExchanger> {
    if config.direct_exchange {
        return Arc::new(exchanger::DirectExchanger::new(
            GoogleOAuthClient::new(http_client.clone(), config),
            config.production_origin.clone(),
        ));
    }
    Arc::new(ProxyExchanger::new(
        http_client.clone(),
        config.token_proxy_url.clone(),
    ))
}

#[cfg(not(feature = "dev-direct-exchange"))]
fn build_exchanger(config: &Config, http_client: &reqwest::Client) -> Arc<dyn TokenExchanger> {
    Arc::new(ProxyExchanger::new(
        http_client.clone(),
        config.token_proxy_url.clone(),
    ))
}

fn router(state: AppState) -> Router {
    Router::new()
        // Calendar connection
        .route("/auth/google/connect", get(auth::connect))
        .route(handshake::CALLBACK_PATH, get(auth::callback))
        .route("/auth/google/status", get(auth::status))
        .route("/auth/google/logout", post(auth::logout))
        // Task sync
        .route(
            "/tasks/:id/sync",
            put(sync::sync_task).delete(sync::unsync_task),
        )
        // Token proxy (holds the client secret)
        .route(
            "/api/google/exchange-token",
            post(token_proxy::exchange_token).fallback(token_proxy::method_not_allowed),
        )
        .route(
            "/api/google/refresh-token",
            post(token_proxy::refresh_token).fallback(token_proxy::method_not_allowed),
        )
        .route(
            "/api/google/revoke-token",
            post(token_proxy::revoke_token).fallback(token_proxy::method_not_allowed),
        )
        .route("/health", get(health_check))
        .route("/", get(root_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskcal_sync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!("Starting Google Calendar sync service");

    let durable = Arc::new(FileKvStore::open(config.durable_store_path())?);
    info!("Durable storage at: {}", durable.path().display());

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .user_agent(concat!("taskcal-sync/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let exchanger = build_exchanger(&config, &http_client);
    let calendar = Arc::new(GoogleCalendarClient::new(
        http_client.clone(),
        config.calendar_api_base.clone(),
        config.calendar_id.clone(),
    ));

    let addr = config.server_address();
    let port = config.port;
    let app_state = AppState::new(config, http_client, durable, exchanger, calendar);
    info!(
        "Calendar connected at startup: {}",
        app_state.status.is_connected()
    );

    let app = router(app_state);
    info!("Listening on {}", addr);

    println!("\n📅 Task Calendar Sync");
    println!("=====================");
    println!("Server running at: http://localhost:{}", port);
    println!("\nConnect Google Calendar:");
    println!("  Visit: http://localhost:{}/auth/google/connect", port);
    println!("\nAPI Endpoints:");
    println!("  Status: http://localhost:{}/auth/google/status", port);
    println!("  Health: http://localhost:{}/health", port);
    println!("  Sync:   http://localhost:{}/tasks/:id/sync\n", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn root_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "service": "Task Calendar Sync",
        "status": "running",
        "endpoints": {
            "connect": "/auth/google/connect",
            "status": "/auth/google/status",
            "logout": "/auth/google/logout",
            "sync": "/tasks/:id/sync",
            "health": "/health"
        },
        "note": "Visit /auth/google/connect to link Google Calendar"
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::token_manager::tests::FakeExchanger;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    /// Config whose Google endpoints point at `provider_base`.
    pub(crate) fn test_config(provider_base: &str) -> Config {
        let provider_base = provider_base.to_string();
        Config::from_lookup(move |key| match key {
            "GOOGLE_CLIENT_ID" => Some("client-123".into()),
            "GOOGLE_CLIENT_SECRET" => Some("secret-456".into()),
            "PRODUCTION_ORIGIN" => Some("https://tasks.example.com".into()),
            "OAUTH_TOKEN_URL" => Some(format!("{}/token", provider_base)),
            "OAUTH_REVOKE_URL" => Some(format!("{}/revoke", provider_base)),
            _ => None,
        })
        .unwrap()
    }

    pub(crate) fn test_state(
        provider_base: &str,
        exchanger: Arc<dyn TokenExchanger>,
        calendar: Arc<dyn CalendarApi>,
    ) -> AppState {
        AppState::new(
            test_config(provider_base),
            reqwest::Client::new(),
            Arc::new(MemoryKvStore::new()),
            exchanger,
            calendar,
        )
    }

    pub(crate) async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_root() {
        let calendar = Arc::new(GoogleCalendarClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            "primary",
        ));
        let app = router(test_state(
            "http://127.0.0.1:9",
            Arc::new(FakeExchanger::default()),
            calendar,
        ));

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["service"], "Task Calendar Sync");
    }
}
