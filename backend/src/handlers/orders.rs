//! Order HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::models::Order;
use crate::services::order::{
    CreateOrderInput, CreatedOrder, OrderDetail, OrderFilter, OrderSummary, StateChangeInput,
};
use crate::services::OrderService;
use crate::AppState;
use shared::{PaginatedResponse, Pagination};

/// Create an order from the back office
pub async fn create_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateOrderInput>,
) -> AppResult<(StatusCode, Json<CreatedOrder>)> {
    let actor = current_user.0.actor();
    actor.ensure_admin("create orders")?;

    let catalogs = state.catalogs.get_or_load(&state.db).await?;
    let service = OrderService::new(state.db);
    let created = service
        .create_order(input, &catalogs, Some(actor.user_id))
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Query(filter): Query<OrderFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<OrderSummary>>> {
    let catalogs = state.catalogs.get_or_load(&state.db).await?;
    let service = OrderService::new(state.db);
    let orders = service.list_orders(&filter, &pagination, &catalogs).await?;

    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(order_id): Path<i64>,
) -> AppResult<Json<OrderDetail>> {
    let catalogs = state.catalogs.get_or_load(&state.db).await?;
    let service = OrderService::new(state.db);
    let order = service.get_order(order_id, &catalogs).await?;

    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<i64>,
) -> AppResult<Json<Order>> {
    let service = OrderService::new(state.db);
    let order = service
        .cancel_order(order_id, &current_user.0.actor())
        .await?;

    Ok(Json(order))
}

/// Manual correction of an order's state by an administrator
pub async fn correct_order_state(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(order_id): Path<i64>,
    Json(input): Json<StateChangeInput>,
) -> AppResult<Json<Order>> {
    let catalogs = state.catalogs.get_or_load(&state.db).await?;
    let service = OrderService::new(state.db);
    let order = service
        .correct_order_state(order_id, &input.state, &current_user.0.actor(), &catalogs)
        .await?;

    Ok(Json(order))
}
