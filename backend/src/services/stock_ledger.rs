//! Stock ledger service: per-(item, warehouse) quantities
//!
//! The ledger is replaced wholesale by each import and adjusted in place when
//! lines are prepared (transfer into staging) and when units are finalized
//! (decrement from staging).

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    aggregate_import_rows, Actor, ImportAggregate, ImportStatus, StockEntry, StockEntryRow,
    StockImport, StockImportLogRow, StockImportRow, StockLevel, WarehouseValuation,
    STAGING_WAREHOUSE, STOCK_COLUMNS,
};
use shared::{PaginatedResponse, Pagination};

/// Stock ledger service
#[derive(Clone)]
pub struct StockLedgerService {
    db: PgPool,
}

/// Filter for listing ledger rows
#[derive(Debug, Default, Deserialize)]
pub struct StockFilter {
    pub item_code: Option<String>,
    pub warehouse_code: Option<String>,
    /// Matches item code or description
    pub search: Option<String>,
}

/// Result of a ledger replace
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub import_id: i64,
    pub rows_received: usize,
    pub entries_written: usize,
    pub warehouse_count: usize,
    pub skipped_rows: usize,
}

/// Usable stock of one item in one warehouse
#[derive(Debug, Clone, Serialize)]
pub struct UsableQuantity {
    pub item_code: String,
    pub warehouse_code: String,
    pub usable_quantity: i32,
}

/// Ledger row as listed, with its usable quantity and stock indicator
#[derive(Debug, Clone, Serialize)]
pub struct StockRow {
    #[serde(flatten)]
    pub entry: StockEntry,
    pub usable_quantity: i32,
    pub level: StockLevel,
}

impl From<StockEntry> for StockRow {
    fn from(entry: StockEntry) -> Self {
        Self {
            usable_quantity: entry.usable_quantity(),
            level: entry.level(),
            entry,
        }
    }
}

impl StockLedgerService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Atomically replace the whole ledger with the aggregated `rows`.
    ///
    /// Reservations are left as they are; operators reconcile them by hand.
    pub async fn replace_all(
        &self,
        actor: &Actor,
        rows: &[StockImportRow],
        file_name: Option<String>,
    ) -> AppResult<ImportSummary> {
        actor.ensure_admin("import stock")?;

        let aggregate = aggregate_import_rows(rows);
        if aggregate.status() == ImportStatus::Failed {
            let mut conn = self.db.acquire().await?;
            let import_id = Self::record_import(&mut conn, &file_name, &aggregate, actor).await?;
            tracing::warn!(
                import_id,
                rows_received = aggregate.rows_received,
                skipped_rows = aggregate.skipped_rows,
                actor = %actor.user_id,
                "Stock import rejected; ledger left unchanged"
            );
            return Err(AppError::Validation {
                field: "rows".to_string(),
                message: "the import contains no row with item and warehouse codes".to_string(),
                message_es: "La carga no contiene filas con código y bodega".to_string(),
            });
        }

        let entries = &aggregate.entries;
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM stock_entries")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO stock_entries (
                item_code, warehouse_code, description, group_code, group_description,
                warehouse_name, location, quantity_available, quantity_reserved,
                unit_price, line_total, category
            )
            SELECT * FROM UNNEST(
                $1::varchar[], $2::varchar[], $3::text[], $4::varchar[], $5::text[],
                $6::varchar[], $7::varchar[], $8::int4[], $9::int4[],
                $10::numeric[], $11::numeric[], $12::varchar[]
            )
            "#,
        )
        .bind(entries.iter().map(|e| e.item_code.clone()).collect::<Vec<_>>())
        .bind(entries.iter().map(|e| e.warehouse_code.clone()).collect::<Vec<_>>())
        .bind(entries.iter().map(|e| e.description.clone()).collect::<Vec<_>>())
        .bind(entries.iter().map(|e| e.group_code.clone()).collect::<Vec<_>>())
        .bind(entries.iter().map(|e| e.group_description.clone()).collect::<Vec<_>>())
        .bind(entries.iter().map(|e| e.warehouse_name.clone()).collect::<Vec<_>>())
        .bind(entries.iter().map(|e| e.location.clone()).collect::<Vec<_>>())
        .bind(entries.iter().map(|e| e.quantity_available).collect::<Vec<_>>())
        .bind(entries.iter().map(|e| e.quantity_reserved).collect::<Vec<_>>())
        .bind(entries.iter().map(|e| e.unit_price).collect::<Vec<_>>())
        .bind(entries.iter().map(|e| e.line_total).collect::<Vec<_>>())
        .bind(entries.iter().map(|e| e.category.clone()).collect::<Vec<_>>())
        .execute(&mut *tx)
        .await?;

        let import_id = Self::record_import(&mut tx, &file_name, &aggregate, actor).await?;

        tx.commit().await?;

        tracing::info!(
            import_id,
            rows = aggregate.rows_received,
            entries = entries.len(),
            skipped = aggregate.skipped_rows,
            actor = %actor.user_id,
            "Stock ledger replaced"
        );

        Ok(ImportSummary {
            import_id,
            rows_received: aggregate.rows_received,
            entries_written: entries.len(),
            warehouse_count: aggregate.warehouse_count,
            skipped_rows: aggregate.skipped_rows,
        })
    }

    /// Move `quantity` of an item from `origin` into the staging warehouse.
    ///
    async fn record_import(
        conn: &mut PgConnection,
        file_name: &Option<String>,
        aggregate: &ImportAggregate,
        actor: &Actor,
    ) -> AppResult<i64> {
        let import_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO stock_imports (
                file_name, rows_received, entries_written, warehouse_count, skipped_rows,
                status, imported_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(file_name)
        .bind(aggregate.rows_received as i32)
        .bind(aggregate.entries.len() as i32)
        .bind(aggregate.warehouse_count as i32)
        .bind(aggregate.skipped_rows as i32)
        .bind(aggregate.status().as_str())
        .bind(actor.user_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(import_id)
    }

    /// Runs inside the caller's transaction. Origin never drops below zero and
    /// a missing staging row is created. Returns the quantity moved into staging.
    pub async fn transfer(
        conn: &mut PgConnection,
        item_code: &str,
        origin: &str,
        quantity: i32,
        line_item_id: Option<i64>,
        performed_by: Option<Uuid>,
    ) -> AppResult<i32> {
        let origin = origin.trim();
        if origin.is_empty() || quantity <= 0 {
            return Ok(0);
        }

        match Self::lock_entry(&mut *conn, item_code, origin).await? {
            Some(mut entry) => {
                entry.withdraw(quantity);
                Self::write_quantity(&mut *conn, &entry).await?;
            }
            None => {
                tracing::warn!(item_code, warehouse = origin, "Transfer origin has no ledger row");
            }
        }

        match Self::lock_entry(&mut *conn, item_code, STAGING_WAREHOUSE).await? {
            Some(mut staging) => {
                staging.deposit(quantity);
                Self::write_quantity(&mut *conn, &staging).await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO stock_entries (item_code, warehouse_code, description, quantity_available)
                    VALUES (
                        $1, $2,
                        (SELECT description FROM stock_entries WHERE item_code = $1 AND warehouse_code = $4),
                        $3
                    )
                    ON CONFLICT (item_code, warehouse_code) DO UPDATE
                    SET quantity_available = stock_entries.quantity_available + EXCLUDED.quantity_available,
                        updated_at = NOW()
                    "#,
                )
                .bind(item_code)
                .bind(STAGING_WAREHOUSE)
                .bind(quantity)
                .bind(origin)
                .execute(&mut *conn)
                .await?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO stock_transfers (
                item_code, origin_warehouse, destination_warehouse, quantity, line_item_id, performed_by
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(item_code)
        .bind(origin)
        .bind(STAGING_WAREHOUSE)
        .bind(quantity)
        .bind(line_item_id)
        .bind(performed_by)
        .execute(&mut *conn)
        .await?;

        tracing::info!(item_code, origin, quantity, "Stock moved to staging");

        Ok(quantity)
    }

    /// Take dispatched goods out of staging. Returns the quantity removed.
    ///
    /// Idempotency is the caller's job.
    pub async fn decrement_on_dispatch(
        conn: &mut PgConnection,
        item_code: &str,
        quantity: i32,
    ) -> AppResult<i32> {
        let Some(mut staging) = Self::lock_entry(&mut *conn, item_code, STAGING_WAREHOUSE).await?
        else {
            tracing::warn!(item_code, quantity, "No staging row to decrement on dispatch");
            return Ok(0);
        };

        let removed = staging.withdraw(quantity);
        Self::write_quantity(&mut *conn, &staging).await?;

        if removed < quantity {
            tracing::warn!(item_code, quantity, removed, "Staging stock short on dispatch");
        }
        Ok(removed)
    }

    async fn lock_entry(
        conn: &mut PgConnection,
        item_code: &str,
        warehouse_code: &str,
    ) -> AppResult<Option<StockEntry>> {
        let row = sqlx::query_as::<_, StockEntryRow>(&format!(
            "SELECT {} FROM stock_entries WHERE item_code = $1 AND warehouse_code = $2 FOR UPDATE",
            STOCK_COLUMNS
        ))
        .bind(item_code)
        .bind(warehouse_code)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(StockEntry::from))
    }

    async fn write_quantity(conn: &mut PgConnection, entry: &StockEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE stock_entries
            SET quantity_available = $3, updated_at = NOW()
            WHERE item_code = $1 AND warehouse_code = $2
            "#,
        )
        .bind(&entry.item_code)
        .bind(&entry.warehouse_code)
        .bind(entry.quantity_available)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Usable quantity; a missing row reads as zero
    pub async fn usable_quantity(&self, item_code: &str, warehouse_code: &str) -> AppResult<UsableQuantity> {
        let row = sqlx::query_as::<_, StockEntryRow>(&format!(
            "SELECT {} FROM stock_entries WHERE item_code = $1 AND warehouse_code = $2",
            STOCK_COLUMNS
        ))
        .bind(item_code.trim())
        .bind(warehouse_code.trim())
        .fetch_optional(&self.db)
        .await?;

        Ok(UsableQuantity {
            item_code: item_code.trim().to_string(),
            warehouse_code: warehouse_code.trim().to_string(),
            usable_quantity: row.map(StockEntry::from).map_or(0, |e| e.usable_quantity()),
        })
    }

    /// Ledger rows of the given items across every warehouse
    pub async fn entries_for_items(
        conn: &mut PgConnection,
        item_codes: &[String],
    ) -> AppResult<Vec<StockEntry>> {
        let rows = sqlx::query_as::<_, StockEntryRow>(&format!(
            "SELECT {} FROM stock_entries WHERE item_code = ANY($1)",
            STOCK_COLUMNS
        ))
        .bind(item_codes)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.into_iter().map(StockEntry::from).collect())
    }

    pub async fn list(
        &self,
        filter: &StockFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<StockRow>> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));

        let where_clause = r#"
            WHERE ($1::varchar IS NULL OR item_code = $1)
              AND ($2::varchar IS NULL OR warehouse_code = $2)
              AND ($3::text IS NULL OR item_code ILIKE $3 OR description ILIKE $3)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM stock_entries {}",
            where_clause
        ))
        .bind(&filter.item_code)
        .bind(&filter.warehouse_code)
        .bind(&search)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, StockEntryRow>(&format!(
            "SELECT {} FROM stock_entries {} ORDER BY item_code, warehouse_code LIMIT $4 OFFSET $5",
            STOCK_COLUMNS, where_clause
        ))
        .bind(&filter.item_code)
        .bind(&filter.warehouse_code)
        .bind(&search)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(
            rows.into_iter()
                .map(|row| StockRow::from(StockEntry::from(row)))
                .collect(),
            pagination,
            total.max(0) as u64,
        ))
    }

    /// Available quantity times unit price, per warehouse. Read-only.
    pub async fn valuation(&self) -> AppResult<Vec<WarehouseValuation>> {
        let rows = sqlx::query_as::<_, StockEntryRow>(&format!(
            "SELECT {} FROM stock_entries ORDER BY warehouse_code",
            STOCK_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(summarize_valuation(rows.into_iter().map(StockEntry::from)))
    }

    pub async fn import_history(&self, limit: i64) -> AppResult<Vec<StockImport>> {
        let rows = sqlx::query_as::<_, StockImportLogRow>(
            r#"
            SELECT id, file_name, rows_received, entries_written, warehouse_count,
                   skipped_rows, status, imported_by, created_at
            FROM stock_imports
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(StockImport::from).collect())
    }
}

fn summarize_valuation(entries: impl Iterator<Item = StockEntry>) -> Vec<WarehouseValuation> {
    let mut by_warehouse: BTreeMap<String, WarehouseValuation> = BTreeMap::new();
    for entry in entries {
        let summary = by_warehouse
            .entry(entry.warehouse_code.clone())
            .or_insert_with(|| WarehouseValuation {
                warehouse_code: entry.warehouse_code.clone(),
                warehouse_name: entry.warehouse_name.clone(),
                item_count: 0,
                total_units: 0,
                total_value: Decimal::ZERO,
            });
        summary.item_count += 1;
        summary.total_units += entry.quantity_available as i64;
        summary.total_value += entry.valuation();
    }
    by_warehouse.into_values().collect()
}

// ============================================================================
// CSV ingestion
// ============================================================================

const REQUIRED_HEADERS: [&str; 4] = ["Codigo", "Descripcion", "Cod.Bodega", "Stock"];

/// Spreadsheet export row, headers as the ERP writes them
#[derive(Debug, Deserialize)]
struct CsvStockRow {
    #[serde(rename = "Codigo")]
    item_code: String,
    #[serde(rename = "Descripcion", default)]
    description: Option<String>,
    #[serde(rename = "Cod.Grupo", default)]
    group_code: Option<String>,
    #[serde(rename = "Descripcion Grupo", default)]
    group_description: Option<String>,
    #[serde(rename = "Cod.Bodega")]
    warehouse_code: String,
    #[serde(rename = "Descripcion Bodega", default)]
    warehouse_name: Option<String>,
    #[serde(rename = "Ubicacion", default)]
    location: Option<String>,
    #[serde(rename = "Stock", default)]
    stock: Option<String>,
    #[serde(rename = "Precio $", default)]
    unit_price: Option<String>,
    #[serde(rename = "Total $", default)]
    line_total: Option<String>,
    #[serde(rename = "Categoria", default)]
    category: Option<String>,
}

/// Parse a CSV export of the stock spreadsheet into import rows
pub fn parse_stock_csv(body: &str) -> AppResult<Vec<StockImportRow>> {
    let delimiter = if body.lines().next().is_some_and(|h| h.contains(';')) {
        b';'
    } else {
        b','
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| AppError::ValidationError(format!("unreadable CSV header: {}", e)))?
        .clone();
    if let Some(missing) = REQUIRED_HEADERS
        .iter()
        .find(|required| !headers.iter().any(|h| h == **required))
    {
        return Err(AppError::Validation {
            field: "file".to_string(),
            message: format!("missing required column '{}'", missing),
            message_es: format!("Falta la columna obligatoria '{}'", missing),
        });
    }

    let mut rows = Vec::new();
    for (index, record) in reader.deserialize::<CsvStockRow>().enumerate() {
        let record = record.map_err(|e| {
            AppError::ValidationError(format!("CSV row {} is malformed: {}", index + 2, e))
        })?;
        rows.push(StockImportRow {
            item_code: record.item_code,
            description: record.description,
            group_code: record.group_code,
            group_description: record.group_description,
            warehouse_code: record.warehouse_code,
            warehouse_name: record.warehouse_name,
            location: record.location,
            quantity: record
                .stock
                .as_deref()
                .and_then(parse_amount)
                .and_then(|q| q.trunc().to_i64())
                .unwrap_or(0),
            unit_price: record.unit_price.as_deref().and_then(parse_amount),
            line_total: record.line_total.as_deref().and_then(parse_amount),
            category: record.category,
        });
    }
    Ok(rows)
}

/// Parse `1.234,50`, `1234.5` or `$ 1,234` style amounts
fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '$')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = match (cleaned.contains('.'), cleaned.contains(',')) {
        (true, true) => {
            // Whichever separator comes last is the decimal point
            if cleaned.rfind(',') > cleaned.rfind('.') {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (false, true) => {
            let decimals = cleaned.len() - cleaned.rfind(',').map_or(0, |i| i + 1);
            if decimals == 3 && cleaned.matches(',').count() >= 1 && !cleaned.starts_with('0') {
                cleaned.replace(',', "")
            } else {
                cleaned.replace(',', ".")
            }
        }
        _ => cleaned,
    };
    Decimal::from_str(&normalized).ok()
}
