//! Local dashboard API exposing a [`SessionController`] over HTTP.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    client::ScanApi,
    controller::SessionController,
    error::SubmitError,
    types::ScanRequest,
};

pub struct AppState<A> {
    controller: Arc<SessionController<A>>,
}

impl<A> Clone for AppState<A> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
        }
    }
}

pub fn router<A: ScanApi + 'static>(controller: Arc<SessionController<A>>) -> Router {
    let state = AppState { controller };
    let api = Router::new()
        .route("/view", get(get_view::<A>))
        .route("/scans", post(post_scan::<A>))
        .route("/reset", post(post_reset::<A>))
        .route("/polling/stop", post(post_stop_polling::<A>))
        .route("/progress", get(get_progress::<A>))
        .route("/export", get(get_export::<A>))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server<A: ScanApi + 'static>(
    bind: &str,
    controller: Arc<SessionController<A>>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "serving dashboard API");
    axum::serve(listener, router(controller)).await?;
    Ok(())
}

async fn get_view<A: ScanApi + 'static>(State(app): State<AppState<A>>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.controller.view()))
}

async fn post_scan<A: ScanApi + 'static>(
    State(app): State<AppState<A>>,
    Json(req): Json<ScanRequest>,
) -> impl IntoResponse {
    match app.controller.submit(req).await {
        Ok(id) => (StatusCode::ACCEPTED, Json(json!({ "scanId": id }))).into_response(),
        Err(e) => {
            let status = match e {
                SubmitError::Superseded => StatusCode::CONFLICT,
                SubmitError::Api(_) | SubmitError::EmptySessionId => StatusCode::BAD_GATEWAY,
            };
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn post_reset<A: ScanApi + 'static>(State(app): State<AppState<A>>) -> impl IntoResponse {
    app.controller.reset().await;
    StatusCode::NO_CONTENT
}

async fn post_stop_polling<A: ScanApi + 'static>(
    State(app): State<AppState<A>>,
) -> impl IntoResponse {
    app.controller.stop_polling().await;
    StatusCode::NO_CONTENT
}

async fn get_progress<A: ScanApi + 'static>(State(app): State<AppState<A>>) -> impl IntoResponse {
    match app.controller.fetch_progress().await {
        Ok(Some(progress)) => (StatusCode::OK, Json(progress)).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn get_export<A: ScanApi + 'static>(State(app): State<AppState<A>>) -> impl IntoResponse {
    match app.controller.view().session.and_then(|s| s.export_url) {
        Some(url) => (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, url)]).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
