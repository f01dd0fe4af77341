//! Shipment unit HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::shipment::{AdvanceUnitInput, CreateUnitInput, UnitDetail};
use crate::services::ShipmentService;
use crate::AppState;

/// Pack prepared lines into a new unit
pub async fn create_unit(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateUnitInput>,
) -> AppResult<(StatusCode, Json<UnitDetail>)> {
    let catalogs = state.catalogs.get_or_load(&state.db).await?;
    let service = ShipmentService::new(state.db);
    let unit = service
        .create_unit(input, &current_user.0.actor(), &catalogs)
        .await?;

    Ok((StatusCode::CREATED, Json(unit)))
}

pub async fn get_unit(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(unit_id): Path<i64>,
) -> AppResult<Json<UnitDetail>> {
    let catalogs = state.catalogs.get_or_load(&state.db).await?;
    let service = ShipmentService::new(state.db);
    let unit = service.get_unit(unit_id, &catalogs).await?;

    Ok(Json(unit))
}

pub async fn advance_state(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(unit_id): Path<i64>,
    Json(input): Json<AdvanceUnitInput>,
) -> AppResult<Json<UnitDetail>> {
    let catalogs = state.catalogs.get_or_load(&state.db).await?;
    let service = ShipmentService::new(state.db);
    let unit = service
        .advance_state(unit_id, input, &current_user.0.actor(), &catalogs)
        .await?;

    Ok(Json(unit))
}
