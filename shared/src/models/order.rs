//! Order ("Solicitud") models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::LineItem;

/// Kind of request an order represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "PC")]
    CustomerOrder,
    #[serde(rename = "OC")]
    PurchaseOrder,
    #[serde(rename = "EM")]
    Emergency,
    #[serde(rename = "ST")]
    InternalTransfer,
    #[serde(rename = "OF")]
    OfficeRequest,
    #[serde(rename = "RM")]
    CustomerPickup,
}

impl OrderType {
    pub const ALL: [OrderType; 6] = [
        OrderType::CustomerOrder,
        OrderType::PurchaseOrder,
        OrderType::Emergency,
        OrderType::InternalTransfer,
        OrderType::OfficeRequest,
        OrderType::CustomerPickup,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            OrderType::CustomerOrder => "PC",
            OrderType::PurchaseOrder => "OC",
            OrderType::Emergency => "EM",
            OrderType::InternalTransfer => "ST",
            OrderType::OfficeRequest => "OF",
            OrderType::CustomerPickup => "RM",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrderType::CustomerOrder => "Pedido cliente",
            OrderType::PurchaseOrder => "Orden de compra",
            OrderType::Emergency => "Emergencia",
            OrderType::InternalTransfer => "Solicitud de traslado",
            OrderType::OfficeRequest => "Oficina",
            OrderType::CustomerPickup => "Retiro de mercancías",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        OrderType::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Parse a code or any of the labels intake clients send for it.
    pub fn from_input(value: &str) -> Option<Self> {
        let normalized = value.trim().to_uppercase().replace('_', " ");
        if let Some(order_type) = OrderType::from_code(&normalized) {
            return Some(order_type);
        }
        match normalized.as_str() {
            "PEDIDO CLIENTE" | "CUSTOMER ORDER" => Some(OrderType::CustomerOrder),
            "ORDEN COMPRA" | "ORDEN DE COMPRA" | "PURCHASE ORDER" => Some(OrderType::PurchaseOrder),
            "EMERGENCIA" | "EMERGENCY" => Some(OrderType::Emergency),
            "SOLICITUD TRASLADO" | "SOLICITUD DE TRASLADO" | "INTERNAL TRANSFER" => {
                Some(OrderType::InternalTransfer)
            }
            "OFICINA" | "OFFICE REQUEST" => Some(OrderType::OfficeRequest),
            "RETIRO MERCANCIAS" | "RETIRO DE MERCANCIAS" | "RETIRO DE MERCANCÍAS"
            | "CUSTOMER PICKUP" => Some(OrderType::CustomerPickup),
            _ => None,
        }
    }

    /// Customer and purchase orders are always tied to an upstream document number.
    pub fn requires_external_reference(&self) -> bool {
        matches!(self, OrderType::CustomerOrder | OrderType::PurchaseOrder)
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Overall state of an order
///
/// Variants are declared in workflow order; `rank` follows that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Pending,
    Preparing,
    ReadyForPacking,
    ReadyForDispatch,
    InTransit,
    Dispatched,
    Cancelled,
}

impl OrderState {
    pub const ALL: [OrderState; 7] = [
        OrderState::Pending,
        OrderState::Preparing,
        OrderState::ReadyForPacking,
        OrderState::ReadyForDispatch,
        OrderState::InTransit,
        OrderState::Dispatched,
        OrderState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "pending",
            OrderState::Preparing => "preparing",
            OrderState::ReadyForPacking => "ready_for_packing",
            OrderState::ReadyForDispatch => "ready_for_dispatch",
            OrderState::InTransit => "in_transit",
            OrderState::Dispatched => "dispatched",
            OrderState::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        OrderState::ALL.into_iter().find(|state| state.as_str() == s)
    }

    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Dispatched | OrderState::Cancelled)
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A customer or internal request for materials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_type: OrderType,
    pub external_reference: Option<String>,
    pub client_name: String,
    /// Slug into the carrier catalog
    pub carrier: String,
    pub state: OrderState,
    pub urgent: bool,
    /// When false, none of this order's lines ever touch the stock ledger
    pub affects_stock: bool,
    pub note: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Single-line view of an order, kept for screens built before orders had lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyHeader {
    pub item_code: String,
    pub description: String,
    pub quantity: i32,
}

impl LegacyHeader {
    /// First line wins; pre-migration orders fall back to their stored header columns.
    pub fn project(lines: &[LineItem], stored: Option<LegacyHeader>) -> Option<LegacyHeader> {
        match lines.first() {
            Some(first) => Some(LegacyHeader {
                item_code: first.item_code.clone(),
                description: first.description.clone(),
                quantity: first.quantity,
            }),
            None => stored.filter(|header| !header.item_code.trim().is_empty()),
        }
    }
}

/// Number of item codes on an order.
///
/// Orders created before line items existed report one code when their header
/// still carries an item code.
pub fn total_line_count(line_count: usize, legacy_item_code: Option<&str>) -> usize {
    if line_count == 0 && legacy_item_code.is_some_and(|code| !code.trim().is_empty()) {
        return 1;
    }
    line_count
}
