//! Axum HTTP + WebSocket server.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Form, Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::connection::handle_media_stream;
use crate::state::GatewayState;
use crate::twiml;

pub fn router(state: Arc<GatewayState>) -> Router {
    let app = Router::new()
        .route("/media-stream", get(media_stream_handler))
        .route("/incoming-call", post(incoming_call_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Start the gateway and serve until Ctrl+C.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.bind_addr();
    let app = router(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_stream(state, socket))
}

/// Telephony voice webhook. Twilio posts the call as form fields.
async fn incoming_call_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let caller = params.get("From").map(String::as_str);
    let host = state
        .config
        .server
        .as_ref()
        .and_then(|s| s.public_url.clone())
        .or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("localhost:{}", state.config.server_port()));

    info!(
        caller = ?caller,
        call_sid = ?params.get("CallSid"),
        "Incoming call"
    );

    let body = twiml::connect_stream(&twiml::stream_url(&host), caller);
    ([(header::CONTENT_TYPE, "application/xml")], body)
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let active_calls = state.calls.registry.len().await;

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "active_calls": active_calls,
    }))
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (axum::http::StatusCode::OK, handle.render()),
        None => (
            axum::http::StatusCode::NOT_FOUND,
            "metrics recorder not installed".to_string(),
        ),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
