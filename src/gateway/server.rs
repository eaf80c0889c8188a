//! WebSocket upgrade route and handshake authentication.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::header::ORIGIN;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::auth::{self, Principal, TOKEN_PROTOCOL};
use crate::error::ApiError;
use crate::gateway::chatter;
use crate::gateway::hub::Chatter;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    sid: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    check_origin(&headers, state.config.allowed_origin.as_deref())?;

    let sid: u64 = query
        .sid
        .as_deref()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            tracing::error!("request id parameter is missing or invalid");
            ApiError::bad_request("the sid parameter is invalid")
        })?;

    let token = auth::token_from_protocol_header(&headers)
        .ok_or_else(|| ApiError::unauthorized("missing access token"))?;
    let claims = auth::verify_token(&state.config.jwt_secret, &token)?;
    let principal = auth::principal_from_claims(&claims, sid)?;

    let ws = ws
        .protocols([TOKEN_PROTOCOL])
        .max_message_size(state.config.max_message_size)
        .write_buffer_size(state.config.write_buffer_size);

    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state, principal)))
}

async fn handle_connection(
    socket: axum::extract::ws::WebSocket,
    state: AppState,
    principal: Principal,
) {
    let (chatter, outbound_rx, closing_rx) = Chatter::new(
        principal.user_id,
        principal.is_customer,
        principal.is_moderator,
    );
    state.hub.register(&chatter);

    chatter::run(state, chatter, socket, outbound_rx, closing_rx).await;
}

fn check_origin(headers: &HeaderMap, allowed: Option<&str>) -> Result<(), ApiError> {
    let Some(allowed) = allowed else {
        return Ok(());
    };

    let origin = headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::forbidden("origin not allowed"))?;

    if origin_host(origin).eq_ignore_ascii_case(allowed) {
        Ok(())
    } else {
        tracing::error!(origin, "rejected upgrade from a foreign origin");
        Err(ApiError::forbidden("origin not allowed"))
    }
}

/// `http://chat.example:8080/x` → `chat.example`.
fn origin_host(origin: &str) -> &str {
    let rest = origin
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(origin);
    rest.split(['/', ':']).next().unwrap_or(rest)
}
