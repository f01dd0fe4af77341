//! Shipment unit ("Bulto") models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Physical packaging of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    #[default]
    Box,
    Pallet,
    Other,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Box => "box",
            UnitKind::Pallet => "pallet",
            UnitKind::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "box" => Some(UnitKind::Box),
            "pallet" => Some(UnitKind::Pallet),
            "other" => Some(UnitKind::Other),
            _ => None,
        }
    }
}

/// Packing, transit and delivery state of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentState {
    Pending,
    Packed,
    ReadyForDispatch,
    InTransit,
    Delivered,
    Finalized,
    Cancelled,
}

impl ShipmentState {
    pub const ALL: [ShipmentState; 7] = [
        ShipmentState::Pending,
        ShipmentState::Packed,
        ShipmentState::ReadyForDispatch,
        ShipmentState::InTransit,
        ShipmentState::Delivered,
        ShipmentState::Finalized,
        ShipmentState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentState::Pending => "pending",
            ShipmentState::Packed => "packed",
            ShipmentState::ReadyForDispatch => "ready_for_dispatch",
            ShipmentState::InTransit => "in_transit",
            ShipmentState::Delivered => "delivered",
            ShipmentState::Finalized => "finalized",
            ShipmentState::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        ShipmentState::ALL.into_iter().find(|state| state.as_str() == s)
    }

    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentState::Finalized | ShipmentState::Cancelled)
    }
}

impl std::fmt::Display for ShipmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Weight and outer dimensions of a unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    #[serde(default)]
    pub weight_kg: Option<Decimal>,
    #[serde(default)]
    pub length_cm: Option<Decimal>,
    #[serde(default)]
    pub width_cm: Option<Decimal>,
    #[serde(default)]
    pub height_cm: Option<Decimal>,
}

impl Dimensions {
    /// Volume in cubic meters, when all three sides are known
    pub fn volume_m3(&self) -> Option<Decimal> {
        let (length, width, height) = (self.length_cm?, self.width_cm?, self.height_cm?);
        Some((length * width * height / Decimal::from(1_000_000)).round_dp(4))
    }
}

/// A physical package grouping lines of one order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentUnit {
    pub id: i64,
    /// e.g. `UNIT-2026-0007`
    pub code: String,
    pub order_id: i64,
    pub kind: UnitKind,
    pub carrier: String,
    pub tracking_reference: Option<String>,
    #[serde(flatten)]
    pub dimensions: Dimensions,
    pub note: Option<String>,
    pub state: ShipmentState,
    pub packed_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShipmentUnit {
    pub fn has_tracking(&self) -> bool {
        self.tracking_reference
            .as_deref()
            .is_some_and(|reference| !reference.trim().is_empty())
    }
}

/// Milestone timestamps of a unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitTimestamps {
    pub packed_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl UnitTimestamps {
    pub fn of(unit: &ShipmentUnit) -> Self {
        Self {
            packed_at: unit.packed_at,
            dispatched_at: unit.dispatched_at,
            delivered_at: unit.delivered_at,
        }
    }

    /// Stamp the milestones reached by entering `state`, keeping any already set.
    pub fn stamp(mut self, state: ShipmentState, now: DateTime<Utc>) -> Self {
        match state {
            ShipmentState::Packed | ShipmentState::ReadyForDispatch => {
                self.packed_at.get_or_insert(now);
            }
            ShipmentState::InTransit => {
                self.dispatched_at.get_or_insert(now);
            }
            ShipmentState::Delivered => {
                self.delivered_at.get_or_insert(now);
            }
            ShipmentState::Finalized => {
                self.dispatched_at.get_or_insert(now);
                self.delivered_at.get_or_insert(now);
            }
            ShipmentState::Pending | ShipmentState::Cancelled => {}
        }
        self
    }
}
