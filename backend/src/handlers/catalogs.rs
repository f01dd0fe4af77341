//! Configuration registry HTTP handlers
//!
//! Every write drops the cached catalogs so the next read reloads them.

use axum::{extract::State, Json};
use validator::Validate;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::models::{CarrierEntry, Catalogs, OrderTypeEntry, StateDefinition};
use crate::services::catalog::{UpsertCarrierInput, UpsertOrderTypeInput, UpsertStateInput};
use crate::services::CatalogService;
use crate::AppState;

pub async fn get_catalogs(
    State(state): State<AppState>,
    _current_user: CurrentUser,
) -> AppResult<Json<Catalogs>> {
    let catalogs = state.catalogs.get_or_load(&state.db).await?;
    Ok(Json(catalogs.as_ref().clone()))
}

pub async fn upsert_state(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<UpsertStateInput>,
) -> AppResult<Json<StateDefinition>> {
    current_user.0.actor().ensure_admin("edit workflow states")?;
    input.validate()?;

    let saved = CatalogService::new(state.db.clone()).upsert_state(input).await?;
    state.catalogs.invalidate().await;

    Ok(Json(saved))
}

pub async fn upsert_carrier(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<UpsertCarrierInput>,
) -> AppResult<Json<CarrierEntry>> {
    current_user.0.actor().ensure_admin("edit carriers")?;
    input.validate()?;

    let saved = CatalogService::new(state.db.clone()).upsert_carrier(input).await?;
    state.catalogs.invalidate().await;

    Ok(Json(saved))
}

pub async fn upsert_order_type(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<UpsertOrderTypeInput>,
) -> AppResult<Json<OrderTypeEntry>> {
    current_user.0.actor().ensure_admin("edit order types")?;
    input.validate()?;

    let saved = CatalogService::new(state.db.clone())
        .upsert_order_type(input)
        .await?;
    state.catalogs.invalidate().await;

    Ok(Json(saved))
}
