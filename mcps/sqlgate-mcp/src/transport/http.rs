//! HTTP binding
//!
//! - `POST /`, `/mcp`, `/mcp/rpc`: one request envelope in, one response out
//! - `GET /mcp`: event-stream push
//! - `GET /mcp/stream`: NDJSON push
//! - `GET /health`: liveness

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE,
        },
        HeaderValue, Method, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use mcp_common::jsonrpc::{Notification, Response as RpcResponse};
use mcp_common::{internal_error, parse_error};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

use super::push::{Framing, PushHub};
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub dispatcher: Dispatcher,
    pub config: Arc<ServerConfig>,
    /// Clients on `GET /mcp`
    pub events: PushHub,
    /// Clients on `GET /mcp/stream`
    pub stream: PushHub,
}

impl HttpState {
    pub fn new(dispatcher: Dispatcher, config: Arc<ServerConfig>) -> Self {
        Self {
            dispatcher,
            config,
            events: PushHub::new(Framing::EventStream),
            stream: PushHub::new(Framing::NdJson),
        }
    }
}

/// Build the router with permissive CORS on every response
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", post(rpc).fallback(method_not_allowed))
        .route(
            "/mcp",
            post(rpc).get(event_stream).fallback(method_not_allowed),
        )
        .route("/mcp/rpc", post(rpc).fallback(method_not_allowed))
        .route("/mcp/stream", get(ndjson_stream).fallback(method_not_allowed))
        .route("/health", get(health).fallback(method_not_allowed))
        .fallback(not_found)
        .layer(middleware::from_fn(preflight))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` turns true
pub async fn serve(
    listener: TcpListener,
    state: HttpState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("HTTP transport listening on http://{}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

async fn preflight(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

async fn rpc(State(state): State<HttpState>, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Rejecting undecodable body: {}", e);
            let reply = RpcResponse::failure(Value::Null, parse_error(e.to_string()));
            return (StatusCode::BAD_REQUEST, Json(reply)).into_response();
        }
    };

    // Runs to completion even if the client hangs up
    let dispatcher = state.dispatcher.clone();
    let task = tokio::spawn(async move { dispatcher.handle_value(value).await });

    match task.await {
        Ok(Some(reply)) => (StatusCode::OK, Json(reply)).into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            tracing::error!("Request task failed: {}", e);
            let reply = RpcResponse::failure(Value::Null, internal_error("Request handler failed"));
            (StatusCode::INTERNAL_SERVER_ERROR, Json(reply)).into_response()
        }
    }
}

async fn event_stream(State(state): State<HttpState>) -> Response {
    let endpoint = state.config.endpoint_url();
    let stream = state.events.attach(|_| {
        serde_json::to_value(Notification::new("endpoint", json!({ "endpoint": endpoint })))
            .unwrap_or_default()
    });
    push_response(Framing::EventStream, Body::from_stream(stream))
}

async fn ndjson_stream(State(state): State<HttpState>) -> Response {
    let stream = state.stream.attach(|id| {
        json!({
            "type": "connected",
            "clientId": id,
            "timestamp": Utc::now().to_rfc3339(),
        })
    });
    push_response(Framing::NdJson, Body::from_stream(stream))
}

fn push_response(framing: Framing, body: Body) -> Response {
    (
        [
            (CONTENT_TYPE, framing.content_type()),
            (CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

async fn health(State(state): State<HttpState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "port": state.config.port,
    }))
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Not Found", "statusCode": 404})),
    )
        .into_response()
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({"error": "Method Not Allowed", "statusCode": 405})),
    )
        .into_response()
}
