//! Stock ledger HTTP handlers

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::models::{StockImport, StockImportRow, WarehouseValuation};
use crate::services::stock_ledger::{
    parse_stock_csv, ImportSummary, StockFilter, StockRow, UsableQuantity,
};
use crate::services::StockLedgerService;
use crate::AppState;
use shared::{PaginatedResponse, Pagination};

#[derive(Debug, Deserialize)]
pub struct UsableQuery {
    pub item_code: String,
    pub warehouse_code: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    20
}

/// Rows produced by the spreadsheet ingestion
#[derive(Debug, Deserialize)]
pub struct ImportRowsInput {
    #[serde(default)]
    pub file_name: Option<String>,
    pub rows: Vec<StockImportRow>,
}

#[derive(Debug, Deserialize)]
pub struct CsvImportQuery {
    #[serde(default)]
    pub file_name: Option<String>,
}

pub async fn list_stock(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Query(filter): Query<StockFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<StockRow>>> {
    let service = StockLedgerService::new(state.db);
    let entries = service.list(&filter, &pagination).await?;

    Ok(Json(entries))
}

pub async fn usable_quantity(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Query(query): Query<UsableQuery>,
) -> AppResult<Json<UsableQuantity>> {
    let service = StockLedgerService::new(state.db);
    let usable = service
        .usable_quantity(&query.item_code, &query.warehouse_code)
        .await?;

    Ok(Json(usable))
}

pub async fn valuation(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> AppResult<Json<Vec<WarehouseValuation>>> {
    current_user.0.actor().ensure_admin("view stock valuation")?;

    let service = StockLedgerService::new(state.db);
    Ok(Json(service.valuation().await?))
}

pub async fn import_history(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<StockImport>>> {
    current_user.0.actor().ensure_admin("view stock imports")?;

    let service = StockLedgerService::new(state.db);
    Ok(Json(service.import_history(query.limit).await?))
}

/// Replace the ledger from normalized rows
pub async fn import_rows(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ImportRowsInput>,
) -> AppResult<Json<ImportSummary>> {
    let service = StockLedgerService::new(state.db);
    let summary = service
        .replace_all(&current_user.0.actor(), &input.rows, input.file_name)
        .await?;

    Ok(Json(summary))
}

/// Replace the ledger from a CSV export of the stock spreadsheet
pub async fn import_csv(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<CsvImportQuery>,
    body: String,
) -> AppResult<Json<ImportSummary>> {
    let actor = current_user.0.actor();
    actor.ensure_admin("import stock")?;

    let rows = parse_stock_csv(&body)?;
    let service = StockLedgerService::new(state.db);
    let summary = service.replace_all(&actor, &rows, query.file_name).await?;

    Ok(Json(summary))
}
