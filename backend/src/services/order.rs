//! Order and line-item aggregate
//!
//! Every mutation runs in one transaction: lock the order row, apply the
//! rule from `shared::workflow`, write, resync reservations and re-project
//! the order state before committing.

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::{
    convert_all, total_line_count, Actor, CatalogScope, Catalogs, LegacyHeader, LineItem,
    LineItemChanges, LineItemRow, LineState, Order, OrderRow, OrderState, OrderType, Reservation,
    ShipmentUnit, LINE_COLUMNS, ORDER_COLUMNS,
};
use crate::services::{ReservationService, ShipmentService, StockLedgerService};
use shared::validation::{validate_client_name, validate_code, validate_external_reference};
use shared::workflow::{
    apply_line_changes, check_cancellation, check_line_deletion, check_mark_prepared,
    check_start_preparation, check_state_correction, code_prefix, next_sequence,
    project_order_state, transfer_reference, OrderProgress, TRANSFER_PREFIX,
};
use shared::{plan_line_intake, IntakeLine, PaginatedResponse, Pagination};

#[derive(Clone)]
pub struct OrderService {
    db: PgPool,
}

/// Order creation input, shared by the UI and the machine intake endpoint
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderInput {
    /// Type code or label alias
    #[serde(rename = "type", alias = "order_type")]
    pub order_type: String,
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(alias = "client")]
    #[validate(length(min = 1, max = 200, message = "client name is required"))]
    pub client_name: String,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub urgent: bool,
    #[serde(default = "default_affects_stock")]
    pub affects_stock: bool,
    #[serde(default)]
    pub line_items: Vec<IntakeLine>,
}

fn default_affects_stock() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderFilter {
    pub state: Option<String>,
    pub order_type: Option<String>,
    pub urgent: Option<bool>,
    /// Client name, external reference or order id
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StateChangeInput {
    pub state: String,
}

/// Order with its lines, units and display fields
#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub order_type_label: String,
    pub state_label: String,
    pub carrier_label: String,
    pub total_line_count: usize,
    pub legacy_header: Option<LegacyHeader>,
    pub lines: Vec<LineItem>,
    pub units: Vec<ShipmentUnit>,
    pub reservations: Vec<Reservation>,
}

#[derive(Debug, Serialize)]
pub struct OrderSummary {
    #[serde(flatten)]
    pub order: Order,
    pub order_type_label: String,
    pub state_label: String,
    pub carrier_label: String,
    pub total_line_count: usize,
    pub prepared_lines: usize,
}

#[derive(Debug, Serialize)]
pub struct CreatedOrder {
    pub order: OrderDetail,
    /// Submitted lines left out of the order
    pub warnings: Vec<String>,
}

fn code_error(field: &str, message: &str) -> AppError {
    AppError::Validation {
        field: field.to_string(),
        message: message.to_string(),
        message_es: format!("Código inválido: {}", message),
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl OrderService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    pub async fn create_order(
        &self,
        input: CreateOrderInput,
        catalogs: &Catalogs,
        created_by: Option<Uuid>,
    ) -> AppResult<CreatedOrder> {
        input.validate()?;

        let order_type = OrderType::from_input(&input.order_type)
            .filter(|t| catalogs.order_type_allowed(*t))
            .ok_or_else(|| AppError::Validation {
                field: "type".to_string(),
                message: format!("'{}' is not an accepted order type", input.order_type),
                message_es: format!("'{}' no es un tipo de solicitud válido", input.order_type),
            })?;

        let client_name = input.client_name.trim().to_string();
        validate_client_name(&client_name).map_err(|m| AppError::Validation {
            field: "client_name".to_string(),
            message: m.to_string(),
            message_es: "El cliente es obligatorio".to_string(),
        })?;

        let mut external_reference = non_blank(input.external_reference.as_deref());
        validate_external_reference(order_type, external_reference.as_deref()).map_err(|m| {
            AppError::Validation {
                field: "external_reference".to_string(),
                message: m.to_string(),
                message_es: "El número de pedido es obligatorio para este tipo".to_string(),
            }
        })?;

        let carrier = catalogs.normalize_carrier(input.carrier.as_deref().unwrap_or_default());

        let mut tx = self.db.begin().await?;

        let mut wanted_items: Vec<String> = input
            .line_items
            .iter()
            .filter(|l| non_blank(l.warehouse_code.as_deref()).is_none())
            .filter_map(|l| non_blank(l.item_code.as_deref()))
            .collect();
        wanted_items.sort_unstable();
        wanted_items.dedup();
        let stock = if input.affects_stock && !wanted_items.is_empty() {
            StockLedgerService::entries_for_items(&mut tx, &wanted_items).await?
        } else {
            Vec::new()
        };

        let plan = plan_line_intake(&input.line_items, input.affects_stock, &stock)?;
        for line in &plan.lines {
            validate_code(&line.item_code).map_err(|m| code_error("item_code", m))?;
            validate_code(&line.warehouse_code).map_err(|m| code_error("warehouse_code", m))?;
        }

        if order_type == OrderType::InternalTransfer && external_reference.is_none() {
            external_reference = Some(Self::next_transfer_reference(&mut tx).await?);
        }

        let order_row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            INSERT INTO orders (order_type, external_reference, client_name, carrier, urgent, affects_stock, note, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            ORDER_COLUMNS
        ))
        .bind(order_type.code())
        .bind(&external_reference)
        .bind(&client_name)
        .bind(&carrier)
        .bind(input.urgent)
        .bind(input.affects_stock)
        .bind(non_blank(input.note.as_deref()))
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await?;
        let order = Order::try_from(order_row)?;

        for new_line in &plan.lines {
            let line = sqlx::query_as::<_, LineItemRow>(&format!(
                r#"
                INSERT INTO line_items (order_id, item_code, description, quantity, warehouse_code, state)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING {}
                "#,
                LINE_COLUMNS
            ))
            .bind(order.id)
            .bind(&new_line.item_code)
            .bind(&new_line.description)
            .bind(new_line.quantity)
            .bind(&new_line.warehouse_code)
            .bind(new_line.initial_state().as_str())
            .fetch_one(&mut *tx)
            .await?;
            ReservationService::sync_line(&mut tx, &LineItem::try_from(line)?).await?;
        }

        Self::refresh_state(&mut tx, &order).await?;
        tx.commit().await?;

        let warnings = plan.warnings();
        tracing::info!(
            order_id = order.id,
            order_type = order_type.code(),
            reference = ?external_reference,
            lines = plan.lines.len(),
            excluded = plan.excluded.len(),
            "Order created"
        );
        for warning in &warnings {
            tracing::warn!(order_id = order.id, "{}", warning);
        }

        Ok(CreatedOrder {
            order: self.get_order(order.id, catalogs).await?,
            warnings,
        })
    }

    /// Next `TRANSFER-{year}-NNN`, serialised by an advisory lock
    async fn next_transfer_reference(conn: &mut PgConnection) -> AppResult<String> {
        let year = Utc::now().year();
        let prefix = code_prefix(TRANSFER_PREFIX, year);

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&prefix)
            .execute(&mut *conn)
            .await?;

        let existing = sqlx::query_scalar::<_, String>(
            "SELECT external_reference FROM orders WHERE external_reference LIKE $1",
        )
        .bind(format!("{}%", prefix))
        .fetch_all(&mut *conn)
        .await?;

        let sequence = next_sequence(&prefix, existing.iter().map(String::as_str));
        Ok(transfer_reference(year, sequence))
    }

    // ------------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------------

    pub(crate) async fn lock_order(conn: &mut PgConnection, order_id: i64) -> AppResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1 FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))?;

        Order::try_from(row)
    }

    pub(crate) async fn lines_for_order(
        conn: &mut PgConnection,
        order_id: i64,
    ) -> AppResult<Vec<LineItem>> {
        let rows = sqlx::query_as::<_, LineItemRow>(&format!(
            "SELECT {} FROM line_items WHERE order_id = $1 ORDER BY id",
            LINE_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }

    async fn find_line(conn: &mut PgConnection, line_id: i64) -> AppResult<LineItem> {
        let row = sqlx::query_as::<_, LineItemRow>(&format!(
            "SELECT {} FROM line_items WHERE id = $1",
            LINE_COLUMNS
        ))
        .bind(line_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Line item {}", line_id)))?;

        LineItem::try_from(row)
    }

    /// Lock the owning order, then the line itself
    async fn lock_line(conn: &mut PgConnection, line_id: i64) -> AppResult<(Order, LineItem)> {
        let order_id = Self::find_line(&mut *conn, line_id).await?.order_id;
        let order = Self::lock_order(&mut *conn, order_id).await?;

        let row = sqlx::query_as::<_, LineItemRow>(&format!(
            "SELECT {} FROM line_items WHERE id = $1 FOR UPDATE",
            LINE_COLUMNS
        ))
        .bind(line_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Line item {}", line_id)))?;

        Ok((order, LineItem::try_from(row)?))
    }

    /// Recompute and store the order state. The caller holds the order lock.
    pub(crate) async fn refresh_state(conn: &mut PgConnection, order: &Order) -> AppResult<OrderState> {
        let lines = Self::lines_for_order(&mut *conn, order.id).await?;
        let units = ShipmentService::units_for_order(&mut *conn, order.id).await?;
        let projected = project_order_state(order.state, &OrderProgress::from_parts(&lines, &units));

        if projected != order.state {
            sqlx::query("UPDATE orders SET state = $2, updated_at = NOW() WHERE id = $1")
                .bind(order.id)
                .bind(projected.as_str())
                .execute(&mut *conn)
                .await?;
            tracing::info!(
                order_id = order.id,
                from = %order.state,
                to = %projected,
                "Order state projected"
            );
        }
        Ok(projected)
    }

    // ------------------------------------------------------------------------
    // Preparation
    // ------------------------------------------------------------------------

    pub async fn start_line_preparation(&self, line_id: i64, actor: &Actor) -> AppResult<LineItem> {
        let mut tx = self.db.begin().await?;
        let (order, line) = Self::lock_line(&mut tx, line_id).await?;

        check_start_preparation(&line, order.state, actor)?;

        let row = sqlx::query_as::<_, LineItemRow>(&format!(
            r#"
            UPDATE line_items SET state = $2, updated_at = NOW()
            WHERE id = $1 AND state = $3
            RETURNING {}
            "#,
            LINE_COLUMNS
        ))
        .bind(line_id)
        .bind(LineState::Preparing.as_str())
        .bind(LineState::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::Conflict(format!("line {} changed state concurrently", line_id)))?;
        let line = LineItem::try_from(row)?;

        Self::refresh_state(&mut tx, &order).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = order.id,
            line_id,
            warehouse = %line.warehouse_code,
            actor = %actor.user_id,
            "Line preparation started"
        );
        Ok(line)
    }

    /// Mark a line prepared, moving its stock into staging when the order affects stock
    pub async fn mark_line_prepared(&self, line_id: i64, actor: &Actor) -> AppResult<LineItem> {
        let mut tx = self.db.begin().await?;
        let (order, line) = Self::lock_line(&mut tx, line_id).await?;

        check_mark_prepared(&line, order.state, actor)?;

        // Only one concurrent prepare can win this update
        let row = sqlx::query_as::<_, LineItemRow>(&format!(
            r#"
            UPDATE line_items
            SET state = $2, prepared_by = $3, prepared_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND state <> $2
            RETURNING {}
            "#,
            LINE_COLUMNS
        ))
        .bind(line_id)
        .bind(LineState::Prepared.as_str())
        .bind(actor.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::Conflict(format!("line {} is already prepared", line_id)))?;
        let prepared = LineItem::try_from(row)?;

        let moved = if order.affects_stock {
            StockLedgerService::transfer(
                &mut tx,
                &prepared.item_code,
                &prepared.warehouse_code,
                prepared.quantity,
                Some(prepared.id),
                Some(actor.user_id),
            )
            .await?
        } else {
            0
        };

        ReservationService::sync_line(&mut tx, &prepared).await?;
        let order_state = Self::refresh_state(&mut tx, &order).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = order.id,
            line_id,
            item_code = %prepared.item_code,
            warehouse = %prepared.warehouse_code,
            moved,
            order_state = %order_state,
            actor = %actor.user_id,
            "Line prepared"
        );
        Ok(prepared)
    }

    // ------------------------------------------------------------------------
    // Line maintenance
    // ------------------------------------------------------------------------

    pub async fn update_line(
        &self,
        line_id: i64,
        changes: LineItemChanges,
        actor: &Actor,
    ) -> AppResult<LineItem> {
        let mut tx = self.db.begin().await?;
        let (order, line) = Self::lock_line(&mut tx, line_id).await?;

        let updated = apply_line_changes(&line, &changes, order.state, actor)?;
        validate_code(&updated.item_code).map_err(|m| code_error("item_code", m))?;
        validate_code(&updated.warehouse_code).map_err(|m| code_error("warehouse_code", m))?;

        let row = sqlx::query_as::<_, LineItemRow>(&format!(
            r#"
            UPDATE line_items
            SET item_code = $2, description = $3, quantity = $4, warehouse_code = $5,
                state = $6, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            LINE_COLUMNS
        ))
        .bind(line_id)
        .bind(&updated.item_code)
        .bind(&updated.description)
        .bind(updated.quantity)
        .bind(&updated.warehouse_code)
        .bind(updated.state.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let saved = LineItem::try_from(row)?;

        ReservationService::sync_line(&mut tx, &saved).await?;
        Self::refresh_state(&mut tx, &order).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = order.id,
            line_id,
            state = %saved.state,
            actor = %actor.user_id,
            "Line updated"
        );
        Ok(saved)
    }

    pub async fn delete_line(&self, line_id: i64, actor: &Actor) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let (order, line) = Self::lock_line(&mut tx, line_id).await?;

        check_line_deletion(&line, actor)?;

        ReservationService::release_for_line(&mut tx, line_id).await?;
        let result = sqlx::query("DELETE FROM line_items WHERE id = $1 AND shipment_unit_id IS NULL")
            .bind(line_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "line {} is packed in a shipment unit",
                line_id
            )));
        }

        Self::refresh_state(&mut tx, &order).await?;
        tx.commit().await?;

        tracing::info!(order_id = order.id, line_id, actor = %actor.user_id, "Line deleted");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Administrative operations
    // ------------------------------------------------------------------------

    pub async fn cancel_order(&self, order_id: i64, actor: &Actor) -> AppResult<Order> {
        let mut tx = self.db.begin().await?;
        let order = Self::lock_order(&mut tx, order_id).await?;

        check_cancellation(order.state, actor)?;

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET state = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .bind(OrderState::Cancelled.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let released = ReservationService::release_open_for_order(&mut tx, order_id).await?;
        tx.commit().await?;

        tracing::info!(
            order_id,
            from = %order.state,
            released,
            actor = %actor.user_id,
            "Order cancelled"
        );
        Order::try_from(row)
    }

    pub async fn correct_order_state(
        &self,
        order_id: i64,
        target: &str,
        actor: &Actor,
        catalogs: &Catalogs,
    ) -> AppResult<Order> {
        let mut tx = self.db.begin().await?;
        let order = Self::lock_order(&mut tx, order_id).await?;

        let to = check_state_correction(order.state, target.trim(), actor, catalogs)?;

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET state = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .bind(to.as_str())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(
            order_id,
            from = %order.state,
            to = %to,
            actor = %actor.user_id,
            "Order state corrected"
        );
        Order::try_from(row)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub async fn get_order(&self, order_id: i64, catalogs: &Catalogs) -> AppResult<OrderDetail> {
        let mut conn = self.db.acquire().await?;

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))?;

        let legacy = row.legacy_header();
        let legacy_code = row.legacy_item_code.clone();
        let order = Order::try_from(row)?;
        let lines = Self::lines_for_order(&mut conn, order_id).await?;
        let units = ShipmentService::units_for_order(&mut conn, order_id).await?;
        let reservations = ReservationService::new(self.db.clone()).for_order(order_id).await?;

        Ok(OrderDetail {
            order_type_label: catalogs.order_type_label(order.order_type),
            state_label: catalogs.state_label(CatalogScope::Order, order.state.as_str()),
            carrier_label: catalogs.carrier_label(&order.carrier),
            total_line_count: total_line_count(lines.len(), legacy_code.as_deref()),
            legacy_header: LegacyHeader::project(&lines, legacy),
            order,
            lines,
            units,
            reservations,
        })
    }

    pub async fn list_orders(
        &self,
        filter: &OrderFilter,
        pagination: &Pagination,
        catalogs: &Catalogs,
    ) -> AppResult<PaginatedResponse<OrderSummary>> {
        let state = non_blank(filter.state.as_deref());
        let order_type = match non_blank(filter.order_type.as_deref()) {
            Some(value) => Some(
                OrderType::from_input(&value)
                    .ok_or_else(|| AppError::ValidationError(format!("unknown order type '{}'", value)))?
                    .code(),
            ),
            None => None,
        };
        let search = non_blank(filter.search.as_deref()).map(|s| format!("%{}%", s));

        let where_clause = r#"
            WHERE ($1::varchar IS NULL OR state = $1)
              AND ($2::varchar IS NULL OR order_type = $2)
              AND ($3::boolean IS NULL OR urgent = $3)
              AND ($4::text IS NULL OR client_name ILIKE $4 OR external_reference ILIKE $4
                   OR id::text ILIKE $4)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM orders {}", where_clause))
            .bind(&state)
            .bind(order_type)
            .bind(filter.urgent)
            .bind(&search)
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders {} ORDER BY urgent DESC, created_at DESC LIMIT $5 OFFSET $6",
            ORDER_COLUMNS, where_clause
        ))
        .bind(&state)
        .bind(order_type)
        .bind(filter.urgent)
        .bind(&search)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let counts = sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT order_id, COUNT(*), COUNT(*) FILTER (WHERE state = 'prepared')
            FROM line_items
            WHERE order_id = ANY($1)
            GROUP BY order_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.db)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let (lines, prepared) = counts
                .iter()
                .find(|(id, _, _)| *id == row.id)
                .map(|(_, lines, prepared)| (*lines as usize, *prepared as usize))
                .unwrap_or((0, 0));
            let legacy_code = row.legacy_item_code.clone();
            let order = Order::try_from(row)?;
            summaries.push(OrderSummary {
                order_type_label: catalogs.order_type_label(order.order_type),
                state_label: catalogs.state_label(CatalogScope::Order, order.state.as_str()),
                carrier_label: catalogs.carrier_label(&order.carrier),
                total_line_count: total_line_count(lines, legacy_code.as_deref()),
                prepared_lines: prepared,
                order,
            });
        }

        Ok(PaginatedResponse::new(summaries, pagination, total.max(0) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_input_accepts_machine_payload_keys() {
        let input: CreateOrderInput = serde_json::from_value(serde_json::json!({
            "type": "ST",
            "client": "SUC LOS ANGELES",
            "line_items": [{ "item_code": "3502040", "quantity": 5 }]
        }))
        .unwrap();
        assert_eq!(input.order_type, "ST");
        assert_eq!(input.client_name, "SUC LOS ANGELES");
        assert!(input.affects_stock);
        assert!(!input.urgent);
        assert_eq!(input.line_items.len(), 1);
    }

    #[test]
    fn test_create_input_requires_client() {
        let input: CreateOrderInput = serde_json::from_value(serde_json::json!({
            "order_type": "PC",
            "client_name": ""
        }))
        .unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_non_blank_trims() {
        assert_eq!(non_blank(Some("  ")), None);
        assert_eq!(non_blank(Some(" OC-1 ")), Some("OC-1".to_string()));
        assert_eq!(non_blank(None), None);
    }
}
