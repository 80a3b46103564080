use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures::FutureExt;
use tracing::{info, warn};
use updater_common::{DispatchError, LookupError, RoutingKey};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::jobs::{BulkJobs, Trigger};
use crate::metrics::{self, Metrics};
use crate::readiness::ReadinessAggregator;
use crate::source::EngagementSource;

pub struct AppState {
    pub service_name: String,
    pub dispatcher: Dispatcher,
    pub source: EngagementSource,
    pub jobs: BulkJobs,
    pub readiness: ReadinessAggregator,
    /// Serves `/metrics` and records requests when set.
    pub metrics: Option<Arc<Metrics>>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let mut routes = Router::new()
        .route("/", get(index))
        .route("/trigger/all", post(trigger_all))
        .route("/trigger/jobs", get(list_jobs))
        .route("/trigger/{id}", post(trigger_one))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness));

    if let Some(recorder) = state.metrics.clone() {
        routes = routes
            .route("/metrics", get(metrics::expose).with_state(recorder.clone()))
            .route_layer(axum::middleware::from_fn_with_state(
                recorder,
                metrics::track_requests,
            ));
    }

    routes
        .with_state(state)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "name": state.service_name }))
}

/// Start a full recomputation in the background.
async fn trigger_all(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.jobs.trigger() {
        Trigger::Queued(job) => info!(job, "Bulk recomputation requested"),
        Trigger::Coalesced => info!("Bulk recomputation requested, joined pending job"),
    }
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "Background job triggered" })),
    )
}

async fn list_jobs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.jobs.recent())
}

/// Recompute one engagement and answer once it is written.
async fn trigger_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let uuid = match Uuid::parse_str(&id) {
        Ok(u) => u,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("{id:?} is not a UUID") })),
            )
                .into_response()
        }
    };

    let reference = match state.source.lookup_one(uuid).await {
        Ok(reference) => reference,
        Err(LookupError::NotFound(_)) => return not_found(uuid),
        Err(LookupError::Upstream(e)) => {
            warn!(engagement = %uuid, error = %e, "Engagement lookup failed");
            return bad_gateway(e.to_string());
        }
    };

    info!(engagement = %uuid, routing_key = %RoutingKey::ENGAGEMENT_EDIT, "Manual trigger");
    match state.dispatcher.dispatch(&reference).await {
        Ok(_) => Json(serde_json::json!({ "status": "OK" })).into_response(),
        Err(DispatchError::NotFound(_)) => not_found(uuid),
        Err(DispatchError::Upstream(e)) => {
            warn!(engagement = %uuid, error = %e, "Manual dispatch failed");
            bad_gateway(e.to_string())
        }
    }
}

fn not_found(uuid: Uuid) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("engagement {uuid} not found") })),
    )
        .into_response()
}

fn bad_gateway(message: String) -> axum::response::Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

async fn liveness() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    match AssertUnwindSafe(state.readiness.check()).catch_unwind().await {
        Ok(report) if report.is_ready() => StatusCode::NO_CONTENT,
        Ok(report) => {
            warn!(unhealthy = ?report.unhealthy(), "Not ready");
            StatusCode::SERVICE_UNAVAILABLE
        }
        Err(_) => {
            warn!("Readiness check panicked");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
