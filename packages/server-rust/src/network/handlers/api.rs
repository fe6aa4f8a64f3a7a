//! Bridge from axum to the request pipeline for every `/api` route.

use std::net::{IpAddr, SocketAddr};

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use fitsync_core::{PipelineResponse, RequestContext};
use serde_json::json;
use tracing::{debug, warn};

use super::AppState;
use crate::service::PipelineRequest;

/// Builds a [`RequestContext`] from the HTTP request, runs it through the
/// route table and renders whatever comes back.
///
/// Guard rejections and handler failures arrive as `PipelineError` and are
/// rendered with their structured JSON body; nothing escapes as a bare 500.
pub async fn api_handler(State(state): State<AppState>, request: Request) -> Response {
    if !state.shutdown.is_accepting() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "server is shutting down", "reason": "draining" })),
        )
            .into_response();
    }
    let _in_flight = state.shutdown.in_flight_guard();

    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let mut ctx = RequestContext::new(
        parts.method.clone(),
        parts.uri.path(),
        client_key(&parts.headers, peer, &state.config.trusted_proxies),
    )
    .with_timeout(state.api_timeout);
    if let Some(query) = parts.uri.query() {
        ctx = ctx.with_query(query);
    }
    if let Some(token) = bearer_token(&parts.headers) {
        ctx = ctx.with_bearer_token(token);
    }
    if let Some(id) = parts.headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
        ctx = ctx.with_request_id(id);
    }

    let body = match read_body(body, state.config.max_body_bytes).await {
        Ok(body) => body,
        Err(resp) => return resp,
    };

    let lifecycle = ctx.lifecycle();
    let result = state.routes.dispatch(PipelineRequest::new(ctx, body)).await;
    debug!(termination = ?lifecycle.termination(), "api request finished");

    match result {
        Ok(resp) => into_http(resp),
        Err(e) => {
            if e.is_handler_failure() {
                warn!(error = %e, "handler failed");
            }
            into_http(e.to_response())
        }
    }
}

async fn read_body(body: Body, limit: usize) -> Result<bytes::Bytes, Response> {
    to_bytes(body, limit).await.map_err(|e| {
        debug!(error = %e, "request body rejected");
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({ "error": "request body too large or unreadable", "reason": "bad_body" })),
        )
            .into_response()
    })
}

/// Rate-limit identity for the caller.
///
/// The socket peer, unless that peer is a trusted proxy, in which case the
/// first `x-forwarded-for` hop it reports. `"unknown"` when neither exists.
fn client_key(headers: &HeaderMap, peer: Option<IpAddr>, trusted: &[IpAddr]) -> String {
    let Some(peer) = peer else {
        return "unknown".to_string();
    };
    if !trusted.contains(&peer) {
        return peer.to_string();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(|| peer.to_string(), str::to_string)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn into_http(resp: PipelineResponse) -> Response {
    let PipelineResponse {
        status,
        content_type,
        headers,
        body,
    } = resp;
    let mut out = (status, body).into_response();
    out.headers_mut().extend(headers);
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        out.headers_mut().insert(CONTENT_TYPE, value);
    }
    out
}
