//! Database rows for the dispatch core
//!
//! Rows map one-to-one onto tables; states are stored as their slugs and
//! parsed into the shared domain types on the way out.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

pub use shared::models::*;

use crate::error::AppError;

pub const ORDER_COLUMNS: &str = "id, order_type, external_reference, client_name, carrier, state, \
    urgent, affects_stock, note, created_by, legacy_item_code, legacy_description, \
    legacy_quantity, created_at, updated_at";

pub const LINE_COLUMNS: &str = "id, order_id, item_code, description, quantity, warehouse_code, \
    state, shipment_unit_id, prepared_by, prepared_at, dispatch_decremented_at, created_at, \
    updated_at";

pub const UNIT_COLUMNS: &str = "id, code, order_id, kind, carrier, tracking_reference, weight_kg, \
    length_cm, width_cm, height_cm, note, state, packed_at, dispatched_at, delivered_at, \
    created_by, created_at, updated_at";

pub const RESERVATION_COLUMNS: &str = "id, line_item_id, order_id, item_code, warehouse_code, \
    quantity, state, created_at, updated_at";

pub const STOCK_COLUMNS: &str = "item_code, warehouse_code, description, group_code, \
    group_description, warehouse_name, location, quantity_available, quantity_reserved, \
    unit_price, line_total, category";

fn corrupt(kind: &str, value: &str) -> AppError {
    AppError::Internal(format!("stored {} '{}' is not recognised", kind, value))
}

#[derive(Debug, Clone, FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub order_type: String,
    pub external_reference: Option<String>,
    pub client_name: String,
    pub carrier: String,
    pub state: String,
    pub urgent: bool,
    pub affects_stock: bool,
    pub note: Option<String>,
    pub created_by: Option<Uuid>,
    pub legacy_item_code: Option<String>,
    pub legacy_description: Option<String>,
    pub legacy_quantity: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRow {
    /// Header stored by the pre-migration schema, if any
    pub fn legacy_header(&self) -> Option<LegacyHeader> {
        self.legacy_item_code.as_ref().map(|code| LegacyHeader {
            item_code: code.clone(),
            description: self.legacy_description.clone().unwrap_or_default(),
            quantity: self.legacy_quantity.unwrap_or(0),
        })
    }
}

impl TryFrom<OrderRow> for Order {
    type Error = AppError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            order_type: OrderType::from_code(&row.order_type)
                .ok_or_else(|| corrupt("order type", &row.order_type))?,
            state: OrderState::from_str(&row.state)
                .ok_or_else(|| corrupt("order state", &row.state))?,
            id: row.id,
            external_reference: row.external_reference,
            client_name: row.client_name,
            carrier: row.carrier,
            urgent: row.urgent,
            affects_stock: row.affects_stock,
            note: row.note,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct LineItemRow {
    pub id: i64,
    pub order_id: i64,
    pub item_code: String,
    pub description: String,
    pub quantity: i32,
    pub warehouse_code: String,
    pub state: String,
    pub shipment_unit_id: Option<i64>,
    pub prepared_by: Option<Uuid>,
    pub prepared_at: Option<DateTime<Utc>>,
    pub dispatch_decremented_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<LineItemRow> for LineItem {
    type Error = AppError;

    fn try_from(row: LineItemRow) -> Result<Self, Self::Error> {
        Ok(LineItem {
            state: LineState::from_str(&row.state)
                .ok_or_else(|| corrupt("line state", &row.state))?,
            id: row.id,
            order_id: row.order_id,
            item_code: row.item_code,
            description: row.description,
            quantity: row.quantity,
            warehouse_code: row.warehouse_code,
            shipment_unit_id: row.shipment_unit_id,
            prepared_by: row.prepared_by,
            prepared_at: row.prepared_at,
            dispatch_decremented_at: row.dispatch_decremented_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ShipmentUnitRow {
    pub id: i64,
    pub code: String,
    pub order_id: i64,
    pub kind: String,
    pub carrier: String,
    pub tracking_reference: Option<String>,
    pub weight_kg: Option<Decimal>,
    pub length_cm: Option<Decimal>,
    pub width_cm: Option<Decimal>,
    pub height_cm: Option<Decimal>,
    pub note: Option<String>,
    pub state: String,
    pub packed_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ShipmentUnitRow> for ShipmentUnit {
    type Error = AppError;

    fn try_from(row: ShipmentUnitRow) -> Result<Self, Self::Error> {
        Ok(ShipmentUnit {
            kind: UnitKind::from_str(&row.kind).ok_or_else(|| corrupt("unit kind", &row.kind))?,
            state: ShipmentState::from_str(&row.state)
                .ok_or_else(|| corrupt("shipment state", &row.state))?,
            id: row.id,
            code: row.code,
            order_id: row.order_id,
            carrier: row.carrier,
            tracking_reference: row.tracking_reference,
            dimensions: Dimensions {
                weight_kg: row.weight_kg,
                length_cm: row.length_cm,
                width_cm: row.width_cm,
                height_cm: row.height_cm,
            },
            note: row.note,
            packed_at: row.packed_at,
            dispatched_at: row.dispatched_at,
            delivered_at: row.delivered_at,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ReservationRow {
    pub id: i64,
    pub line_item_id: Option<i64>,
    pub order_id: i64,
    pub item_code: String,
    pub warehouse_code: String,
    pub quantity: i32,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = AppError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            state: ReservationState::from_str(&row.state)
                .ok_or_else(|| corrupt("reservation state", &row.state))?,
            id: row.id,
            line_item_id: row.line_item_id,
            order_id: row.order_id,
            item_code: row.item_code,
            warehouse_code: row.warehouse_code,
            quantity: row.quantity,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct StockEntryRow {
    pub item_code: String,
    pub warehouse_code: String,
    pub description: Option<String>,
    pub group_code: Option<String>,
    pub group_description: Option<String>,
    pub warehouse_name: Option<String>,
    pub location: Option<String>,
    pub quantity_available: i32,
    pub quantity_reserved: i32,
    pub unit_price: Option<Decimal>,
    pub line_total: Option<Decimal>,
    pub category: Option<String>,
}

impl From<StockEntryRow> for StockEntry {
    fn from(row: StockEntryRow) -> Self {
        StockEntry {
            item_code: row.item_code,
            warehouse_code: row.warehouse_code,
            description: row.description,
            group_code: row.group_code,
            group_description: row.group_description,
            warehouse_name: row.warehouse_name,
            location: row.location,
            quantity_available: row.quantity_available,
            quantity_reserved: row.quantity_reserved,
            unit_price: row.unit_price,
            line_total: row.line_total,
            category: row.category,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct StockImportLogRow {
    pub id: i64,
    pub file_name: Option<String>,
    pub rows_received: i32,
    pub entries_written: i32,
    pub warehouse_count: i32,
    pub skipped_rows: i32,
    pub status: String,
    pub imported_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<StockImportLogRow> for StockImport {
    fn from(row: StockImportLogRow) -> Self {
        StockImport {
            id: row.id,
            file_name: row.file_name,
            rows_received: row.rows_received,
            entries_written: row.entries_written,
            warehouse_count: row.warehouse_count,
            skipped_rows: row.skipped_rows,
            status: ImportStatus::from_str(&row.status).unwrap_or(ImportStatus::Failed),
            imported_by: row.imported_by,
            created_at: row.created_at,
        }
    }
}

/// Collect rows into domain values, failing on the first corrupt row
pub fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, AppError>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}
