//! Shipment unit manager
//!
//! Packing links prepared lines to a new unit; advancing a unit re-projects
//! the order and, on finalization, takes the unit's goods out of staging once
//! per line.

use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::{
    convert_all, Actor, CatalogScope, Catalogs, Dimensions, LineItem, LineItemRow, LineState,
    ShipmentState, ShipmentUnit, ShipmentUnitRow, UnitKind, LINE_COLUMNS, UNIT_COLUMNS,
};
use crate::services::{OrderService, StockLedgerService};
use shared::validation::validate_dimensions;
use shared::workflow::{
    code_prefix, next_sequence, plan_dispatch_decrements, plan_unit_transition, unit_code,
    validate_unit_selection, UnitCandidate, UNIT_PREFIX,
};

#[derive(Clone)]
pub struct ShipmentService {
    db: PgPool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUnitInput {
    #[validate(length(min = 1, message = "select at least one line"))]
    pub line_ids: Vec<i64>,
    #[serde(default)]
    pub kind: UnitKind,
    /// Defaults to the order's carrier
    #[serde(default)]
    pub carrier: Option<String>,
    #[validate(length(max = 100, message = "tracking reference is too long"))]
    #[serde(default)]
    pub tracking_reference: Option<String>,
    #[serde(flatten)]
    pub dimensions: Dimensions,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdvanceUnitInput {
    #[validate(length(min = 1, message = "state is required"))]
    pub state: String,
    /// Recorded before the move, for carriers that need one in transit
    #[validate(length(max = 100, message = "tracking reference is too long"))]
    #[serde(default)]
    pub tracking_reference: Option<String>,
}

/// Unit with its lines and position within the order
#[derive(Debug, Serialize)]
pub struct UnitDetail {
    #[serde(flatten)]
    pub unit: ShipmentUnit,
    pub state_label: String,
    pub carrier_label: String,
    pub lines: Vec<LineItem>,
    /// 1-based position among the order's units
    pub position: usize,
    pub unit_count: usize,
    /// "2 of 3"
    pub position_label: String,
    pub volume_m3: Option<Decimal>,
}

#[derive(Debug, FromRow)]
struct CandidateRow {
    line_id: i64,
    order_id: i64,
    state: String,
    shipment_unit_id: Option<i64>,
    order_affects_stock: bool,
}

impl TryFrom<CandidateRow> for UnitCandidate {
    type Error = AppError;

    fn try_from(row: CandidateRow) -> Result<Self, Self::Error> {
        Ok(UnitCandidate {
            state: LineState::from_str(&row.state)
                .ok_or_else(|| AppError::Internal(format!("stored line state '{}' is not recognised", row.state)))?,
            line_id: row.line_id,
            order_id: row.order_id,
            shipment_unit_id: row.shipment_unit_id,
            order_affects_stock: row.order_affects_stock,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl ShipmentService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub(crate) async fn units_for_order(
        conn: &mut PgConnection,
        order_id: i64,
    ) -> AppResult<Vec<ShipmentUnit>> {
        let rows = sqlx::query_as::<_, ShipmentUnitRow>(&format!(
            "SELECT {} FROM shipment_units WHERE order_id = $1 ORDER BY id",
            UNIT_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }

    async fn lines_for_unit(
        conn: &mut PgConnection,
        unit_id: i64,
        lock: bool,
    ) -> AppResult<Vec<LineItem>> {
        let rows = sqlx::query_as::<_, LineItemRow>(&format!(
            "SELECT {} FROM line_items WHERE shipment_unit_id = $1 ORDER BY id{}",
            LINE_COLUMNS,
            if lock { " FOR UPDATE" } else { "" }
        ))
        .bind(unit_id)
        .fetch_all(&mut *conn)
        .await?;

        convert_all(rows)
    }

    async fn find_unit(conn: &mut PgConnection, unit_id: i64, lock: bool) -> AppResult<ShipmentUnit> {
        let row = sqlx::query_as::<_, ShipmentUnitRow>(&format!(
            "SELECT {} FROM shipment_units WHERE id = $1{}",
            UNIT_COLUMNS,
            if lock { " FOR UPDATE" } else { "" }
        ))
        .bind(unit_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Shipment unit {}", unit_id)))?;

        ShipmentUnit::try_from(row)
    }

    /// Next `UNIT-{year}-NNNN`, serialised by an advisory lock
    async fn next_unit_code(conn: &mut PgConnection) -> AppResult<String> {
        let year = Utc::now().year();
        let prefix = code_prefix(UNIT_PREFIX, year);

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&prefix)
            .execute(&mut *conn)
            .await?;

        let existing = sqlx::query_scalar::<_, String>("SELECT code FROM shipment_units WHERE code LIKE $1")
            .bind(format!("{}%", prefix))
            .fetch_all(&mut *conn)
            .await?;

        Ok(unit_code(year, next_sequence(&prefix, existing.iter().map(String::as_str))))
    }

    /// Pack the selected lines of one order into a new unit
    pub async fn create_unit(
        &self,
        input: CreateUnitInput,
        actor: &Actor,
        catalogs: &Catalogs,
    ) -> AppResult<UnitDetail> {
        actor.ensure_can_dispatch()?;
        input.validate()?;
        validate_dimensions(&input.dimensions).map_err(|m| AppError::Validation {
            field: "dimensions".to_string(),
            message: m.to_string(),
            message_es: "El peso y las medidas no pueden ser negativos".to_string(),
        })?;

        let mut line_ids = input.line_ids.clone();
        line_ids.sort_unstable();
        line_ids.dedup();

        let mut tx = self.db.begin().await?;

        // Orders first, then lines, in id order
        sqlx::query(
            r#"
            SELECT id FROM orders
            WHERE id IN (SELECT order_id FROM line_items WHERE id = ANY($1))
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(&line_ids)
        .execute(&mut *tx)
        .await?;

        let candidates = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT l.id AS line_id, l.order_id, l.state, l.shipment_unit_id,
                   o.affects_stock AS order_affects_stock
            FROM line_items l
            JOIN orders o ON o.id = l.order_id
            WHERE l.id = ANY($1)
            ORDER BY l.id
            FOR UPDATE OF l
            "#,
        )
        .bind(&line_ids)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(UnitCandidate::try_from)
        .collect::<AppResult<Vec<_>>>()?;

        let order_id = validate_unit_selection(&line_ids, &candidates)?;
        let order = OrderService::lock_order(&mut tx, order_id).await?;
        if order.state.is_terminal() {
            return Err(AppError::InvalidStateTransition(format!(
                "order {} is {} and can no longer be packed",
                order.id, order.state
            )));
        }

        let carrier = match non_blank(input.carrier.as_deref()) {
            Some(carrier) => catalogs.normalize_carrier(&carrier),
            None => order.carrier.clone(),
        };
        let code = Self::next_unit_code(&mut tx).await?;

        let row = sqlx::query_as::<_, ShipmentUnitRow>(&format!(
            r#"
            INSERT INTO shipment_units (
                code, order_id, kind, carrier, tracking_reference, weight_kg, length_cm,
                width_cm, height_cm, note, state, packed_at, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW(), $12)
            RETURNING {}
            "#,
            UNIT_COLUMNS
        ))
        .bind(&code)
        .bind(order.id)
        .bind(input.kind.as_str())
        .bind(&carrier)
        .bind(non_blank(input.tracking_reference.as_deref()))
        .bind(input.dimensions.weight_kg)
        .bind(input.dimensions.length_cm)
        .bind(input.dimensions.width_cm)
        .bind(input.dimensions.height_cm)
        .bind(non_blank(input.note.as_deref()))
        .bind(ShipmentState::Packed.as_str())
        .bind(actor.user_id)
        .fetch_one(&mut *tx)
        .await?;
        let unit = ShipmentUnit::try_from(row)?;

        // Guarded by the row locks above; the IS NULL check keeps a line in one unit only
        let linked = sqlx::query(
            r#"
            UPDATE line_items SET shipment_unit_id = $1, updated_at = NOW()
            WHERE id = ANY($2) AND shipment_unit_id IS NULL
            "#,
        )
        .bind(unit.id)
        .bind(&line_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if linked != line_ids.len() as u64 {
            return Err(AppError::Conflict(
                "some selected lines were packed by another unit".to_string(),
            ));
        }

        let order_state = OrderService::refresh_state(&mut tx, &order).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = order.id,
            unit = %unit.code,
            lines = line_ids.len(),
            order_state = %order_state,
            actor = %actor.user_id,
            "Shipment unit packed"
        );

        self.get_unit(unit.id, catalogs).await
    }

    /// Move a unit forward; finalization decrements staging stock once per line
    pub async fn advance_state(
        &self,
        unit_id: i64,
        input: AdvanceUnitInput,
        actor: &Actor,
        catalogs: &Catalogs,
    ) -> AppResult<UnitDetail> {
        input.validate()?;

        let mut tx = self.db.begin().await?;
        let order_id = Self::find_unit(&mut tx, unit_id, false).await?.order_id;
        let order = OrderService::lock_order(&mut tx, order_id).await?;
        let mut unit = Self::find_unit(&mut tx, unit_id, true).await?;

        if let Some(reference) = non_blank(input.tracking_reference.as_deref()) {
            unit.tracking_reference = Some(reference);
        }
        let transition = plan_unit_transition(
            &unit,
            order.state,
            input.state.trim(),
            actor,
            catalogs,
            Utc::now(),
        )?;

        sqlx::query(
            r#"
            UPDATE shipment_units
            SET state = $2, tracking_reference = $3, packed_at = $4, dispatched_at = $5,
                delivered_at = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(unit_id)
        .bind(transition.to.as_str())
        .bind(&unit.tracking_reference)
        .bind(transition.timestamps.packed_at)
        .bind(transition.timestamps.dispatched_at)
        .bind(transition.timestamps.delivered_at)
        .execute(&mut *tx)
        .await?;

        let mut decremented = 0;
        if transition.decrement_stock && order.affects_stock {
            let lines = Self::lines_for_unit(&mut tx, unit_id, true).await?;
            for decrement in plan_dispatch_decrements(&lines) {
                decremented += StockLedgerService::decrement_on_dispatch(
                    &mut tx,
                    &decrement.item_code,
                    decrement.quantity,
                )
                .await?;

                sqlx::query(
                    r#"
                    UPDATE line_items SET dispatch_decremented_at = NOW()
                    WHERE id = ANY($1) AND dispatch_decremented_at IS NULL
                    "#,
                )
                .bind(&decrement.line_ids)
                .execute(&mut *tx)
                .await?;
            }
        }

        let order_state = OrderService::refresh_state(&mut tx, &order).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = order.id,
            unit = %unit.code,
            from = %transition.from,
            to = %transition.to,
            decremented,
            order_state = %order_state,
            actor = %actor.user_id,
            "Shipment unit advanced"
        );

        self.get_unit(unit_id, catalogs).await
    }

    pub async fn get_unit(&self, unit_id: i64, catalogs: &Catalogs) -> AppResult<UnitDetail> {
        let mut conn = self.db.acquire().await?;
        let unit = Self::find_unit(&mut conn, unit_id, false).await?;
        let lines = Self::lines_for_unit(&mut conn, unit_id, false).await?;
        let siblings = Self::units_for_order(&mut conn, unit.order_id).await?;

        let unit_count = siblings.len();
        let position = siblings
            .iter()
            .position(|u| u.id == unit.id)
            .map_or(unit_count, |index| index + 1);

        Ok(UnitDetail {
            state_label: catalogs.state_label(CatalogScope::Shipment, unit.state.as_str()),
            carrier_label: catalogs.carrier_label(&unit.carrier),
            volume_m3: unit.dimensions.volume_m3(),
            position_label: format!("{} of {}", position, unit_count),
            position,
            unit_count,
            lines,
            unit,
        })
    }
}
