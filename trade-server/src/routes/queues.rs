use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use trade_queue::{Publisher, Topic};

use crate::app::AppState;
use crate::error::AppError;

/// Job totals for every topic queue
pub(super) async fn totals(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let mut queues = Vec::with_capacity(Topic::ALL.len());
    for topic in Topic::ALL {
        let publisher = state.publishers.for_topic(topic).await?;
        let name = publisher.queue().map(|q| q.name().to_string());
        queues.push(json!({
            "topic": topic.as_str(),
            "queue": name,
            "total": publisher.job_total().await?,
        }));
    }
    Ok(Json(json!({ "queues": queues })))
}

/// Drop jobs that have waited past the grace period
pub(super) async fn clean(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Result<Json<Value>, AppError> {
    let topic = topic.parse::<Topic>().map_err(|e| AppError::bad_request(e.to_string()))?;

    let publisher = state.publishers.for_topic(topic).await?;
    let removed = publisher.clean_wait_queue().await?;
    Ok(Json(json!({ "topic": topic.as_str(), "removed": removed })))
}
