//! Line item ("Detalle") models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::STAGING_WAREHOUSE;

/// Preparation state of a single line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineState {
    Pending,
    Preparing,
    Prepared,
}

impl LineState {
    pub const ALL: [LineState; 3] = [LineState::Pending, LineState::Preparing, LineState::Prepared];

    pub fn as_str(&self) -> &'static str {
        match self {
            LineState::Pending => "pending",
            LineState::Preparing => "preparing",
            LineState::Prepared => "prepared",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        LineState::ALL.into_iter().find(|state| state.as_str() == s)
    }

    /// Lines already sitting in the staging warehouse need no preparation.
    pub fn initial_for(warehouse_code: &str) -> Self {
        if is_staging_warehouse(warehouse_code) {
            LineState::Prepared
        } else {
            LineState::Pending
        }
    }
}

impl std::fmt::Display for LineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub fn is_staging_warehouse(warehouse_code: &str) -> bool {
    warehouse_code.trim() == STAGING_WAREHOUSE
}

/// One item and quantity within an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub id: i64,
    pub order_id: i64,
    pub item_code: String,
    pub description: String,
    pub quantity: i32,
    /// Blank until a warehouse is assigned
    pub warehouse_code: String,
    pub state: LineState,
    pub shipment_unit_id: Option<i64>,
    pub prepared_by: Option<Uuid>,
    pub prepared_at: Option<DateTime<Utc>>,
    /// Set once the staging stock for this line has been decremented on dispatch
    pub dispatch_decremented_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LineItem {
    pub fn has_warehouse(&self) -> bool {
        !self.warehouse_code.trim().is_empty()
    }

    pub fn is_staged(&self) -> bool {
        is_staging_warehouse(&self.warehouse_code)
    }

    pub fn is_packed(&self) -> bool {
        self.shipment_unit_id.is_some()
    }
}

/// A line accepted for insertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub item_code: String,
    pub description: String,
    pub quantity: i32,
    pub warehouse_code: String,
}

impl NewLineItem {
    pub fn initial_state(&self) -> LineState {
        LineState::initial_for(&self.warehouse_code)
    }
}

/// Partial update applied by an administrator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineItemChanges {
    pub item_code: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<i32>,
    pub warehouse_code: Option<String>,
}
