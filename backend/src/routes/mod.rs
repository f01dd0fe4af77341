//! Route definitions for the PESCO dispatch API

use axum::{
    middleware,
    routing::{get, patch, post, put},
    Router,
};

use crate::{
    handlers,
    middleware::{api_token_middleware, auth_middleware},
    AppState,
};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Machine intake (API token)
        .nest("/intake", intake_routes(state.clone()))
        // Protected routes
        .nest("/orders", order_routes(state.clone()))
        .nest("/lines", line_routes(state.clone()))
        .nest("/units", unit_routes(state.clone()))
        .nest("/stock", stock_routes(state.clone()))
        .nest("/catalogs", catalog_routes(state))
}

/// Intake routes for external agents
fn intake_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/orders", post(handlers::intake::create_order))
        .route_layer(middleware::from_fn_with_state(state, api_token_middleware))
}

/// Order routes (protected)
fn order_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::orders::list_orders).post(handlers::orders::create_order),
        )
        .route("/:order_id", get(handlers::orders::get_order))
        .route("/:order_id/cancel", post(handlers::orders::cancel_order))
        .route("/:order_id/state", post(handlers::orders::correct_order_state))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Line item routes (protected)
fn line_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/:line_id",
            patch(handlers::lines::update_line)
                .delete(handlers::lines::delete_line),
        )
        .route("/:line_id/start", post(handlers::lines::start_line_preparation))
        .route("/:line_id/prepare", post(handlers::lines::mark_line_prepared))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Shipment unit routes (protected)
fn unit_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::units::create_unit))
        .route("/:unit_id", get(handlers::units::get_unit))
        .route("/:unit_id/state", post(handlers::units::advance_state))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Stock ledger routes (protected)
fn stock_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::stock::list_stock))
        .route("/usable", get(handlers::stock::usable_quantity))
        .route("/valuation", get(handlers::stock::valuation))
        .route("/imports", get(handlers::stock::import_history))
        .route("/import", post(handlers::stock::import_rows))
        .route("/import/csv", post(handlers::stock::import_csv))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Configuration registry routes (protected)
fn catalog_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::catalogs::get_catalogs))
        .route("/states", put(handlers::catalogs::upsert_state))
        .route("/carriers", put(handlers::catalogs::upsert_carrier))
        .route("/order-types", put(handlers::catalogs::upsert_order_type))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
