//! Line intake: normalising submitted lines and assigning warehouses

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::models::{is_staging_warehouse, NewLineItem, StockEntry};

/// Item code used for lines submitted with a description only
pub const UNCODED_ITEM: &str = "SC";

/// A line as submitted by a caller, before any checks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeLine {
    #[serde(default)]
    pub item_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub warehouse_code: Option<String>,
}

/// A submitted line left out of the order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedLine {
    /// Zero-based position in the submitted list
    pub position: usize,
    pub item_code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakePlan {
    pub lines: Vec<NewLineItem>,
    pub excluded: Vec<ExcludedLine>,
}

impl IntakePlan {
    pub fn warnings(&self) -> Vec<String> {
        self.excluded
            .iter()
            .map(|e| format!("line {} ({}) excluded: {}", e.position + 1, e.item_code, e.reason))
            .collect()
    }
}

fn trimmed(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

/// Warehouse with the most usable stock of `item_code`, staging excluded.
pub fn best_warehouse_for<'a>(item_code: &str, stock: &'a [StockEntry]) -> Option<&'a StockEntry> {
    stock
        .iter()
        .filter(|e| e.item_code == item_code && !is_staging_warehouse(&e.warehouse_code))
        .filter(|e| e.usable_quantity() > 0)
        .max_by(|a, b| {
            a.usable_quantity()
                .cmp(&b.usable_quantity())
                .then_with(|| b.warehouse_code.cmp(&a.warehouse_code))
        })
}

/// Turn submitted lines into the lines to insert.
///
/// Fully empty rows are dropped. For stock-affecting orders a line without a
/// warehouse gets the warehouse holding the most usable stock; when no
/// warehouse holds any, the line is excluded and reported instead of failing
/// the whole order. At least one line must survive.
pub fn plan_line_intake(
    submitted: &[IntakeLine],
    affects_stock: bool,
    stock: &[StockEntry],
) -> DomainResult<IntakePlan> {
    let mut plan = IntakePlan::default();

    for (position, line) in submitted.iter().enumerate() {
        let item_code = trimmed(&line.item_code);
        let description = trimmed(&line.description);
        let quantity = line.quantity.unwrap_or(0);

        if item_code.is_empty() && description.is_empty() && quantity <= 0 {
            continue;
        }
        if quantity <= 0 {
            return Err(DomainError::validation(
                "line_items",
                format!(
                    "quantity must be greater than zero for {}",
                    if item_code.is_empty() { &description } else { &item_code }
                ),
            ));
        }
        let quantity = i32::try_from(quantity).map_err(|_| {
            DomainError::validation("line_items", format!("quantity {} is too large", quantity))
        })?;

        let item_code = if item_code.is_empty() {
            UNCODED_ITEM.to_string()
        } else {
            item_code
        };
        let mut warehouse_code = trimmed(&line.warehouse_code);

        if warehouse_code.is_empty() && affects_stock {
            match best_warehouse_for(&item_code, stock) {
                Some(entry) => warehouse_code = entry.warehouse_code.clone(),
                None => {
                    plan.excluded.push(ExcludedLine {
                        position,
                        item_code,
                        reason: "no warehouse has stock for this item".to_string(),
                    });
                    continue;
                }
            }
        }

        plan.lines.push(NewLineItem {
            item_code,
            description,
            quantity,
            warehouse_code,
        });
    }

    if plan.lines.is_empty() {
        let message = if plan.excluded.is_empty() {
            "at least one line with a positive quantity is required".to_string()
        } else {
            format!("no line could be accepted: {}", plan.warnings().join("; "))
        };
        return Err(DomainError::validation("line_items", message));
    }

    Ok(plan)
}
