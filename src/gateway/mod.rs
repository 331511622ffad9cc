//! HTTP gateway for the browser game client.
//!
//! Routes:
//! - `POST /chat` streams a conversation turn as server-sent events
//! - `POST /reset-game`, `/random-event`, `/event-choice`
//! - `POST /api/game/update_money`, `/api/game/update_reputation`
//! - `GET /health`, `GET /api/sessions/{id}`
//! - the static client under `/` when `gateway.static_dir` is set

pub mod api;
pub mod error;

pub use error::ApiError;

use crate::agent::{ConversationOrchestrator, TurnSettings};
use crate::config::Config;
use crate::events::EventGenerator;
use crate::providers::{self, Provider};
use crate::sessions::{self, SessionStore};
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, services::ServeDir, timeout::TimeoutLayer, trace::TraceLayer};

/// Shared state for all axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: ConversationOrchestrator,
    pub events: EventGenerator,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Config, provider: Arc<dyn Provider>, store: Arc<dyn SessionStore>) -> Self {
        let orchestrator = ConversationOrchestrator::new(
            store,
            Arc::clone(&provider),
            TurnSettings::from_config(&config),
        );
        let events = EventGenerator::new(provider, &config);
        Self {
            config: Arc::new(config),
            orchestrator,
            events,
            started_at: Utc::now(),
        }
    }
}

/// Build the full router. Non-streaming routes get the request timeout;
/// `/chat` is bounded by the stream limits instead.
pub fn build_router(state: AppState) -> Router {
    let gateway = &state.config.gateway;
    let request_timeout = Duration::from_secs(gateway.request_timeout_secs);

    let json_routes = Router::new()
        .route("/reset-game", post(api::handle_reset_game))
        .route("/random-event", post(api::handle_random_event))
        .route("/event-choice", post(api::handle_event_choice))
        .route("/api/game/update_money", post(api::handle_update_money))
        .route(
            "/api/game/update_reputation",
            post(api::handle_update_reputation),
        )
        .route("/api/sessions", get(api::handle_list_sessions))
        .route("/api/sessions/{id}", get(api::handle_session_snapshot))
        .route("/health", get(api::handle_health))
        .layer(TimeoutLayer::new(request_timeout));

    let mut router = Router::new()
        .route("/chat", post(api::handle_chat))
        .merge(json_routes);

    if let Some(dir) = gateway.resolved_static_dir() {
        tracing::info!(dir = %dir.display(), "Serving static client");
        router = router
            .nest_service("/frontend", ServeDir::new(&dir))
            .fallback_service(ServeDir::new(dir));
    }

    let body_limit = gateway.max_body_bytes;
    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the gateway until Ctrl-C.
pub async fn run_gateway(config: Config) -> Result<()> {
    let provider = providers::create_provider(
        &config.default_provider,
        config.api_key.as_deref(),
        config.api_url.as_deref(),
    )?;
    let store = sessions::create_session_store();

    let host = config.gateway.host.clone();
    let port = config.gateway.port;
    let model = config.default_model.clone();

    let state = AppState::new(config, Arc::clone(&provider), store);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind gateway to {host}:{port}"))?;
    let addr: SocketAddr = listener.local_addr()?;

    tracing::info!(
        %addr,
        provider = provider.name(),
        model = %model,
        "Gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Gateway shutting down");
        })
        .await
        .context("Gateway server error")?;

    Ok(())
}
