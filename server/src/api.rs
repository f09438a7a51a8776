use crate::{config::Config, gateway, housekeeping, hub::Hub, store::SqliteStore};
use anyhow::Result;
use axum::extract::ws::WebSocketUpgrade;
use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: Config,
}

impl AppState {
    /// Open the configured database and build a single-instance hub.
    pub fn new(config: Config) -> Result<Self> {
        let store = SqliteStore::open(&config.database)?;
        let hub = Hub::local(Arc::new(store), config.realtime.clone());
        Ok(Self { hub, config })
    }

    pub fn with_hub(hub: Hub, config: Config) -> Self {
        Self { hub, config }
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let header_room = headers
        .get("room")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| gateway::serve_socket(socket, hub, header_room))
}

/// Run the HTTP server until it fails.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config)?;
    housekeeping::run_housekeeping(state.hub.clone());
    info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}
