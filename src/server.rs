//! HTTP surface of the built-in provider (`mrpd serve`).

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::handlers::{self, ProviderState};
use crate::protocol::{Envelope, MsgType, MRP_CONTENT_TYPE, MRP_VERSION};
use crate::provider;

/// Maximum bytes per request body (1 MiB).
const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

type SharedState = Arc<ProviderState>;

/// Router for the well-known document, the manifest and the envelope endpoints.
pub fn create_router(state: ProviderState) -> Router {
    Router::new()
        .route("/.well-known/mrp.json", get(well_known))
        .route("/mrp/manifest", get(manifest))
        .route("/mrp/hello", post(hello))
        .route("/mrp/discover", post(discover))
        .route("/mrp/negotiate", post(negotiate))
        .route("/mrp/execute", post(execute))
        .layer(DefaultBodyLimit::max(MAX_MESSAGE_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind `addr` and serve until ctrl-c or SIGTERM.
pub async fn serve(addr: SocketAddr, state: ProviderState) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    tracing::info!("mrpd listening on http://{addr}");
    serve_listener(listener, state, shutdown_signal()).await?;
    tracing::info!("mrpd shut down");
    Ok(())
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve_listener<F>(
    listener: TcpListener,
    state: ProviderState,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)
}

async fn well_known() -> Json<Value> {
    Json(json!({
        "mrp_version": MRP_VERSION,
        "capabilities": ["registry_query", "route", "validate"],
        "manifest_url": "/mrp/manifest",
    }))
}

async fn manifest() -> Response {
    let body = provider::provider_manifest("");
    (
        [(header::CONTENT_TYPE, "application/mrp-manifest+json")],
        body.to_string(),
    )
        .into_response()
}

async fn hello(State(state): State<SharedState>, body: Bytes) -> Response {
    answer(MsgType::Hello, &body, &state).await
}

async fn discover(State(state): State<SharedState>, body: Bytes) -> Response {
    answer(MsgType::Discover, &body, &state).await
}

async fn negotiate(State(state): State<SharedState>, body: Bytes) -> Response {
    answer(MsgType::Negotiate, &body, &state).await
}

async fn execute(State(state): State<SharedState>, body: Bytes) -> Response {
    answer(MsgType::Execute, &body, &state).await
}

/// Every envelope reply, ERROR included, goes out as 200.
async fn answer(expected: MsgType, body: &[u8], state: &ProviderState) -> Response {
    let reply = match serde_json::from_slice::<Value>(body) {
        Ok(raw) => handlers::dispatch(expected, &raw, state).await,
        Err(e) => handlers::reject_raw(&Value::Null, format!("invalid JSON: {e}")),
    };
    envelope_response(&reply)
}

fn envelope_response(envelope: &Envelope) -> Response {
    let body = serde_json::to_string(envelope).expect("Envelope must serialize to JSON");
    (StatusCode::OK, [(header::CONTENT_TYPE, MRP_CONTENT_TYPE)], body).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received terminate signal, shutting down"),
    }
}
