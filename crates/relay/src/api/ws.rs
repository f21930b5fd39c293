//! The WebSocket upgrade handler (spec.md §4.7, §6): verify the bearer
//! token, enforce the tenant's quota, then hand the upgraded socket to
//! [`crate::relay::run_session`].
//!
//! Grounded in `sa_gateway::nodes::ws::node_ws`: extract + verify before
//! `ws.on_upgrade`, with everything past the handshake (duplicate session
//! detection, upstream dial, registration) deferred into the post-upgrade
//! task so it can be reported as an `error` control message instead of an
//! HTTP status.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use vrelay_domain::ids::SessionId;

use crate::relay::run_session;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default, rename = "sessionId")]
    session_id: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

/// `GET {path_prefix}/{sessionId}` — session id carried as a path segment.
pub async fn upgrade_with_path(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, SessionId::from(session_id), query.token.as_deref(), headers, ws).await
}

/// `GET {path_prefix}?sessionId=...` — session id carried as a query param.
pub async fn upgrade_with_query(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(session_id) = query.session_id.clone() else {
        return (StatusCode::BAD_REQUEST, "missing sessionId").into_response();
    };
    upgrade(state, SessionId::from(session_id), query.token.as_deref(), headers, ws).await
}

async fn upgrade(
    state: AppState,
    session_id: SessionId,
    query_token: Option<&str>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let verified = match state.token_verifier.verify(&headers, query_token) {
        Ok(v) => v,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    if state
        .supervisor
        .check_quota(&verified.tenant_id, state.config.relay.max_sessions_per_tenant)
        .is_err()
    {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    ws.on_upgrade(move |socket| async move {
        let supervisor = state.supervisor.clone();
        let task = tokio::spawn(run_session(socket, session_id, verified, state));
        supervisor.register_task(task);
    })
}
