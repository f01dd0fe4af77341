//! Reservation manager
//!
//! Called explicitly by the order and line operations inside their own
//! transaction; nothing here opens a transaction of its own.

use sqlx::{PgConnection, PgPool};

use crate::error::AppResult;
use crate::models::{
    convert_all, plan_reservation_sync, LineItem, Reservation, ReservationRow, ReservationState,
    ReservationSync, RESERVATION_COLUMNS,
};

#[derive(Clone)]
pub struct ReservationService {
    db: PgPool,
}

impl ReservationService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Bring the reservation of `line` in step with its current values
    pub async fn sync_line(conn: &mut PgConnection, line: &LineItem) -> AppResult<ReservationSync> {
        let existing = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM reservations WHERE line_item_id = $1 FOR UPDATE",
            RESERVATION_COLUMNS
        ))
        .bind(line.id)
        .fetch_optional(&mut *conn)
        .await?
        .map(Reservation::try_from)
        .transpose()?;

        let plan = plan_reservation_sync(line, existing.as_ref());
        match &plan {
            ReservationSync::Unchanged => {}
            ReservationSync::Release => {
                Self::release_for_line(&mut *conn, line.id).await?;
            }
            ReservationSync::Create(values) => {
                sqlx::query(
                    r#"
                    INSERT INTO reservations (line_item_id, order_id, item_code, warehouse_code, quantity, state)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(line.id)
                .bind(line.order_id)
                .bind(&values.item_code)
                .bind(&values.warehouse_code)
                .bind(values.quantity)
                .bind(values.state.as_str())
                .execute(&mut *conn)
                .await?;
                tracing::debug!(line_id = line.id, state = values.state.as_str(), "Reservation created");
            }
            ReservationSync::Update(values) => {
                sqlx::query(
                    r#"
                    UPDATE reservations
                    SET item_code = $2, warehouse_code = $3, quantity = $4, state = $5, updated_at = NOW()
                    WHERE line_item_id = $1
                    "#,
                )
                .bind(line.id)
                .bind(&values.item_code)
                .bind(&values.warehouse_code)
                .bind(values.quantity)
                .bind(values.state.as_str())
                .execute(&mut *conn)
                .await?;
                tracing::debug!(line_id = line.id, state = values.state.as_str(), "Reservation updated");
            }
        }
        Ok(plan)
    }

    /// Release the reservation of a line; used before the line is deleted
    pub async fn release_for_line(conn: &mut PgConnection, line_id: i64) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reservations SET state = $2, updated_at = NOW()
            WHERE line_item_id = $1 AND state <> $2
            "#,
        )
        .bind(line_id)
        .bind(ReservationState::Released.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Release every reservation of an order that has not been consumed
    pub async fn release_open_for_order(conn: &mut PgConnection, order_id: i64) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reservations SET state = $2, updated_at = NOW()
            WHERE order_id = $1 AND state = $3
            "#,
        )
        .bind(order_id)
        .bind(ReservationState::Released.as_str())
        .bind(ReservationState::Reserved.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn for_order(&self, order_id: i64) -> AppResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM reservations WHERE order_id = $1 ORDER BY id",
            RESERVATION_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        convert_all(rows)
    }
}
