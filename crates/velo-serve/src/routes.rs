//! HTTP surface: artifact route, health route, shared state.

use crate::error::ServeError;
use crate::serve::serve_rewritten;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use url::Url;
use velo_rewrite::RewriteEngine;

/// Application state shared across handlers. Collaborators are
/// constructed once at startup and injected; handlers never reach for
/// globals.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RewriteEngine>,
}

/// Creates the fetch-path router. Every path that is not `/health` is
/// treated as a candidate artifact request.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(get(artifact))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn artifact(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ServeError> {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ServeError::NotFound("missing Host header".to_string()))?;
    let url = Url::parse(&format!("http://{}{}", host, uri.path()))
        .map_err(|err| ServeError::NotFound(err.to_string()))?;

    let cancel = CancellationToken::new();
    let served = serve_rewritten(&state.engine, &url, &cancel).await?;

    let mut builder = Response::builder().status(StatusCode::OK);
    for (name, value) in served.headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(served.body))
        .map_err(|err| ServeError::Internal(err.to_string()))
}
