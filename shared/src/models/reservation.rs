//! Stock reservation models and the per-line sync plan

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LineItem, LineState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Reserved,
    Consumed,
    Released,
}

impl ReservationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Reserved => "reserved",
            ReservationState::Consumed => "consumed",
            ReservationState::Released => "released",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reserved" => Some(ReservationState::Reserved),
            "consumed" => Some(ReservationState::Consumed),
            "released" => Some(ReservationState::Released),
            _ => None,
        }
    }
}

/// Soft hold of a line's quantity in one warehouse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: i64,
    /// Null once the line has been deleted
    pub line_item_id: Option<i64>,
    pub order_id: i64,
    pub item_code: String,
    pub warehouse_code: String,
    pub quantity: i32,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values a line's reservation must carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationValues {
    pub item_code: String,
    pub warehouse_code: String,
    pub quantity: i32,
    pub state: ReservationState,
}

/// What has to be written to keep a reservation in step with its line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationSync {
    Unchanged,
    Release,
    Create(ReservationValues),
    Update(ReservationValues),
}

/// Compute the write needed after a line is saved.
///
/// A line without warehouse or item code releases its reservation. Otherwise
/// the reservation mirrors the line's item, warehouse and quantity, and is
/// consumed once the line is prepared. A previously released reservation is
/// re-armed when the line gets a warehouse again.
pub fn plan_reservation_sync(line: &LineItem, existing: Option<&Reservation>) -> ReservationSync {
    let item_code = line.item_code.trim();
    let warehouse_code = line.warehouse_code.trim();

    if item_code.is_empty() || warehouse_code.is_empty() {
        return match existing {
            Some(reservation) if reservation.state != ReservationState::Released => {
                ReservationSync::Release
            }
            _ => ReservationSync::Unchanged,
        };
    }

    let state = if line.state == LineState::Prepared {
        ReservationState::Consumed
    } else {
        match existing.map(|r| r.state) {
            Some(ReservationState::Consumed) => ReservationState::Consumed,
            _ => ReservationState::Reserved,
        }
    };

    let values = ReservationValues {
        item_code: item_code.to_string(),
        warehouse_code: warehouse_code.to_string(),
        quantity: line.quantity,
        state,
    };

    match existing {
        None => ReservationSync::Create(values),
        Some(reservation) => {
            let current = ReservationValues {
                item_code: reservation.item_code.clone(),
                warehouse_code: reservation.warehouse_code.clone(),
                quantity: reservation.quantity,
                state: reservation.state,
            };
            if current == values {
                ReservationSync::Unchanged
            } else {
                ReservationSync::Update(values)
            }
        }
    }
}
