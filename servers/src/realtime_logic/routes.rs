use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt, future};
use lib_realtime::core::{HubHandle, OutboundMessage, SnapshotCache, WireMessage, register_session};
use lib_realtime::markets::MarketOracle;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

/// Everything the handlers need. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub snapshot: Arc<SnapshotCache>,
    pub oracle: Arc<MarketOracle>,
    pub queue_capacity: usize,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws/realtime", get(ws_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/api/is_market_open", get(market_open_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Splits the socket and hands both halves to the hub's session pumps.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    let inbound = stream.map(|frame| frame.map(from_axum));
    let outbound =
        sink.with(|msg: OutboundMessage| future::ready(Ok::<_, axum::Error>(to_axum(msg))));

    if let Err(e) = register_session(&state.hub, inbound, outbound, state.queue_capacity).await {
        log::warn!("Rejecting WebSocket client: {}", e);
    }
}

fn from_axum(message: Message) -> WireMessage {
    match message {
        Message::Text(text) => WireMessage::Text(text.as_str().to_owned()),
        Message::Binary(bytes) => WireMessage::Binary(bytes.to_vec()),
        Message::Close(_) => WireMessage::Close,
        Message::Ping(_) | Message::Pong(_) => WireMessage::Control,
    }
}

fn to_axum(message: OutboundMessage) -> Message {
    match message {
        OutboundMessage::Text(frame) => Message::Text(frame.as_ref().into()),
        OutboundMessage::Close => Message::Close(None),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SymbolQuery {
    pub symbol: Option<String>,
}

async fn snapshot_handler(
    State(state): State<AppState>,
    Query(query): Query<SymbolQuery>,
) -> Response {
    let symbol = query.symbol.unwrap_or_default();
    match state.snapshot.get(symbol.trim()) {
        Some(quote) => Json(quote).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "no quote" }))).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CodeQuery {
    pub code: Option<String>,
}

async fn market_open_handler(
    State(state): State<AppState>,
    Query(query): Query<CodeQuery>,
) -> impl IntoResponse {
    let code = query.code.unwrap_or_default();
    let is_open = state.oracle.is_market_open(&code).await;
    Json(json!({ "is_open": is_open }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.hub.session_count().await {
        Ok(sessions) => {
            log::debug!("Health check: {} live session(s)", sessions);
            (StatusCode::OK, "OK")
        }
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "hub stopped"),
    }
}
