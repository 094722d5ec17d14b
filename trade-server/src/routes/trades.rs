use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::{map_json_rejection, map_path_rejection, AppError};
use crate::trades::{CreateTrade, Trade, UpdateStatus};

pub(super) async fn create(
    State(state): State<AppState>,
    body: Result<Json<CreateTrade>, JsonRejection>,
) -> Result<(StatusCode, Json<Trade>), AppError> {
    let Json(request) = body.map_err(map_json_rejection)?;

    let trade = state.trades.insert(Trade::draft(request)?).await?;
    info!(trade_id = %trade.id, "trade drafted");
    Ok((StatusCode::CREATED, Json(trade)))
}

pub(super) async fn get(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Trade>, AppError> {
    let Path(id) = id.map_err(map_path_rejection)?;
    Ok(Json(load(&state, id).await?))
}

pub(super) async fn update_status(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<UpdateStatus>, JsonRejection>,
) -> Result<Json<Trade>, AppError> {
    let Path(id) = id.map_err(map_path_rejection)?;
    let Json(update) = body.map_err(map_json_rejection)?;

    let mut trade = load(&state, id).await?;
    let from = trade.status;
    trade.apply(update)?;

    let trade = state.trades.update(trade).await?;
    info!(trade_id = %trade.id, %from, to = %trade.status, "trade status changed");
    Ok(Json(trade))
}

pub(super) async fn load(state: &AppState, id: Uuid) -> Result<Trade, AppError> {
    state
        .trades
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No trade found for id '{id}'")))
}
