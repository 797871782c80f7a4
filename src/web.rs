//! HTTP front-end: a thin axum layer over the engine. The decision
//! endpoint never fails with an HTTP error for evaluation problems;
//! every outcome is a response document with per-result status.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::{IntoDiagnostic, Result};

use crate::pdp::PdpEngine;
use crate::request::DecisionRequest;
use crate::settings::Settings;

pub fn router(engine: Arc<PdpEngine>) -> Router {
    Router::new()
        .route("/v1/decision", post(handle_decision))
        .route("/healthz", get(health))
        .with_state(engine)
}

async fn handle_decision(
    State(engine): State<Arc<PdpEngine>>,
    Json(request): Json<DecisionRequest>,
) -> impl IntoResponse {
    Json(engine.evaluate(&request))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn serve(settings: Settings, engine: PdpEngine) -> Result<()> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.into_diagnostic()?;
    tracing::info!(%addr, root = engine.root_id(), "Decision endpoint listening");
    axum::serve(listener, router(Arc::new(engine)))
        .await
        .into_diagnostic()?;
    Ok(())
}
