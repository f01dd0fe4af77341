//! Line item HTTP handlers: preparation and maintenance

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::models::{LineItem, LineItemChanges};
use crate::services::OrderService;
use crate::AppState;

pub async fn start_line_preparation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(line_id): Path<i64>,
) -> AppResult<Json<LineItem>> {
    let service = OrderService::new(state.db);
    let line = service
        .start_line_preparation(line_id, &current_user.0.actor())
        .await?;

    Ok(Json(line))
}

pub async fn mark_line_prepared(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(line_id): Path<i64>,
) -> AppResult<Json<LineItem>> {
    let service = OrderService::new(state.db);
    let line = service
        .mark_line_prepared(line_id, &current_user.0.actor())
        .await?;

    Ok(Json(line))
}

pub async fn update_line(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(line_id): Path<i64>,
    Json(changes): Json<LineItemChanges>,
) -> AppResult<Json<LineItem>> {
    let service = OrderService::new(state.db);
    let line = service
        .update_line(line_id, changes, &current_user.0.actor())
        .await?;

    Ok(Json(line))
}

pub async fn delete_line(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(line_id): Path<i64>,
) -> AppResult<StatusCode> {
    let service = OrderService::new(state.db);
    service.delete_line(line_id, &current_user.0.actor()).await?;

    Ok(StatusCode::NO_CONTENT)
}
