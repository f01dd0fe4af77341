//! Stock ledger models and arithmetic

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Warehouse code where prepared goods wait for dispatch
pub const STAGING_WAREHOUSE: &str = "013";

/// Max length of the merged location text
pub const MAX_LOCATION_LEN: usize = 100;

/// Quantity at or below which an entry reads as low stock
pub const LOW_STOCK_THRESHOLD: i32 = 5;

/// One ledger row, unique per (item, warehouse)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockEntry {
    pub item_code: String,
    pub warehouse_code: String,
    pub description: Option<String>,
    pub group_code: Option<String>,
    pub group_description: Option<String>,
    pub warehouse_name: Option<String>,
    pub location: Option<String>,
    pub quantity_available: i32,
    /// Informational only, never enforced against available
    pub quantity_reserved: i32,
    pub unit_price: Option<Decimal>,
    pub line_total: Option<Decimal>,
    pub category: Option<String>,
}

impl StockEntry {
    pub fn new(item_code: impl Into<String>, warehouse_code: impl Into<String>) -> Self {
        Self {
            item_code: item_code.into(),
            warehouse_code: warehouse_code.into(),
            description: None,
            group_code: None,
            group_description: None,
            warehouse_name: None,
            location: None,
            quantity_available: 0,
            quantity_reserved: 0,
            unit_price: None,
            line_total: None,
            category: None,
        }
    }

    pub fn usable_quantity(&self) -> i32 {
        (self.quantity_available - self.quantity_reserved).max(0)
    }

    /// Remove up to `quantity` units; available never goes below zero.
    ///
    /// Returns the quantity actually removed.
    pub fn withdraw(&mut self, quantity: i32) -> i32 {
        let removed = quantity.max(0).min(self.quantity_available.max(0));
        self.quantity_available = (self.quantity_available - quantity.max(0)).max(0);
        removed
    }

    pub fn deposit(&mut self, quantity: i32) {
        self.quantity_available = self.quantity_available.saturating_add(quantity.max(0));
    }

    /// Available quantity valued at the unit price; unpriced rows are worth zero.
    pub fn valuation(&self) -> Decimal {
        self.unit_price
            .map(|price| price * Decimal::from(self.quantity_available))
            .unwrap_or(Decimal::ZERO)
    }

    pub fn level(&self) -> StockLevel {
        StockLevel::from_quantity(self.quantity_available)
    }
}

/// Coarse stock indicator shown next to ledger rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    OutOfStock,
    Low,
    Available,
}

impl StockLevel {
    pub fn from_quantity(quantity: i32) -> Self {
        if quantity <= 0 {
            StockLevel::OutOfStock
        } else if quantity <= LOW_STOCK_THRESHOLD {
            StockLevel::Low
        } else {
            StockLevel::Available
        }
    }
}

/// A normalized row handed over by the spreadsheet ingestion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockImportRow {
    pub item_code: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub group_code: Option<String>,
    #[serde(default)]
    pub group_description: Option<String>,
    pub warehouse_code: String,
    #[serde(default)]
    pub warehouse_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub quantity: i64,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub line_total: Option<Decimal>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Result of merging import rows into ledger entries
#[derive(Debug, Clone, PartialEq)]
pub struct ImportAggregate {
    /// Entries in first-seen order
    pub entries: Vec<StockEntry>,
    pub rows_received: usize,
    pub skipped_rows: usize,
    pub warehouse_count: usize,
}

impl ImportAggregate {
    /// An import that yields no ledger entry is logged as failed and never applied
    pub fn status(&self) -> ImportStatus {
        if self.entries.is_empty() {
            ImportStatus::Failed
        } else {
            ImportStatus::Completed
        }
    }
}

/// Merge import rows so that each (item, warehouse) pair appears once.
///
/// Quantities are summed and floored at zero, descriptive fields come from the
/// first row of the pair and distinct locations are joined with " / ".
pub fn aggregate_import_rows(rows: &[StockImportRow]) -> ImportAggregate {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut entries: Vec<StockEntry> = Vec::new();
    let mut totals: Vec<i64> = Vec::new();
    let mut locations: Vec<Vec<String>> = Vec::new();
    let mut skipped_rows = 0;

    for row in rows {
        let item_code = row.item_code.trim();
        let warehouse_code = row.warehouse_code.trim();
        if item_code.is_empty() || warehouse_code.is_empty() {
            skipped_rows += 1;
            continue;
        }

        let key = (item_code.to_string(), warehouse_code.to_string());
        let position = match index.get(&key) {
            Some(position) => *position,
            None => {
                let mut entry = StockEntry::new(item_code, warehouse_code);
                entry.description = non_blank(&row.description);
                entry.group_code = non_blank(&row.group_code);
                entry.group_description = non_blank(&row.group_description);
                entry.warehouse_name = non_blank(&row.warehouse_name);
                entry.unit_price = row.unit_price;
                entry.line_total = row.line_total;
                entry.category = non_blank(&row.category);
                entries.push(entry);
                totals.push(0);
                locations.push(Vec::new());
                index.insert(key, entries.len() - 1);
                entries.len() - 1
            }
        };

        totals[position] = totals[position].saturating_add(row.quantity);
        if let Some(location) = non_blank(&row.location) {
            if !locations[position].contains(&location) {
                locations[position].push(location);
            }
        }
    }

    for (position, entry) in entries.iter_mut().enumerate() {
        entry.quantity_available = totals[position].clamp(0, i32::MAX as i64) as i32;
        if !locations[position].is_empty() {
            let joined = locations[position].join(" / ");
            entry.location = Some(joined.chars().take(MAX_LOCATION_LEN).collect());
        }
    }

    let mut warehouses: Vec<&str> = entries.iter().map(|e| e.warehouse_code.as_str()).collect();
    warehouses.sort_unstable();
    warehouses.dedup();

    ImportAggregate {
        warehouse_count: warehouses.len(),
        entries,
        rows_received: rows.len(),
        skipped_rows,
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Outcome of an import run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(ImportStatus::Completed),
            "failed" => Some(ImportStatus::Failed),
            _ => None,
        }
    }
}

/// Import log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockImport {
    pub id: i64,
    pub file_name: Option<String>,
    pub rows_received: i32,
    pub entries_written: i32,
    pub warehouse_count: i32,
    pub skipped_rows: i32,
    pub status: ImportStatus,
    pub imported_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Ledger value of one warehouse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseValuation {
    pub warehouse_code: String,
    pub warehouse_name: Option<String>,
    pub item_count: i64,
    pub total_units: i64,
    pub total_value: Decimal,
}
