//! HTTP controllers.

mod metrics;
mod notifications;
mod queues;
mod trades;

use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use trade_queue::Job;

use crate::app::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/trades", post(trades::create))
        .route("/trades/{id}", get(trades::get))
        .route("/trades/{id}/status", patch(trades::update_status))
        .route("/email/trade/{id}/request", post(notifications::request_mail))
        .route("/email/trade/{id}/declined", post(notifications::declined_mail))
        .route("/email/trade/{id}/accepted", post(notifications::accepted_mail))
        .route("/messenger/trade/{id}/announce", post(notifications::announce))
        .route("/queues", get(queues::totals))
        .route("/queues/{topic}/clean", post(queues::clean))
        .route("/metrics", get(metrics::render))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// Scrape endpoint for processes that only run consumers
pub fn metrics_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/metrics", get(metrics::render))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// 202 body for enqueued notifications; delivery itself is not confirmed
fn queued(queue: &str, jobs: &[Job]) -> (StatusCode, Json<Value>) {
    let jobs: Vec<Value> = jobs.iter().map(|job| json!({ "id": job.id, "name": job.name })).collect();
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "queued",
            "delivery": "at-least-attempted",
            "queue": queue,
            "jobs": jobs,
        })),
    )
}
