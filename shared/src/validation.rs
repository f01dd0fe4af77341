//! Validation utilities for order headers and shipment units

use rust_decimal::Decimal;

use crate::models::{Dimensions, OrderType};

// ============================================================================
// Order header
// ============================================================================

pub const MAX_CLIENT_NAME_LEN: usize = 200;
pub const MAX_CODE_LEN: usize = 50;

/// Validate the client name after trimming
pub fn validate_client_name(name: &str) -> Result<(), &'static str> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Client name is required");
    }
    if name.chars().count() > MAX_CLIENT_NAME_LEN {
        return Err("Client name is too long");
    }
    Ok(())
}

/// Customer and purchase orders need their upstream document number
pub fn validate_external_reference(
    order_type: OrderType,
    reference: Option<&str>,
) -> Result<(), &'static str> {
    let reference = reference.map(str::trim).unwrap_or_default();
    if order_type.requires_external_reference() && reference.is_empty() {
        return Err("External reference is required for this order type");
    }
    if reference.chars().count() > MAX_CODE_LEN {
        return Err("External reference is too long");
    }
    Ok(())
}

/// Validate an item or warehouse code
pub fn validate_code(code: &str) -> Result<(), &'static str> {
    if code.chars().count() > MAX_CODE_LEN {
        return Err("Code is too long");
    }
    if code.chars().any(char::is_control) {
        return Err("Code contains control characters");
    }
    Ok(())
}

// ============================================================================
// Shipment units
// ============================================================================

/// Weight and sides, when given, must not be negative
pub fn validate_dimensions(dimensions: &Dimensions) -> Result<(), &'static str> {
    let values = [
        dimensions.weight_kg,
        dimensions.length_cm,
        dimensions.width_cm,
        dimensions.height_cm,
    ];
    if values.iter().flatten().any(|v| *v < Decimal::ZERO) {
        return Err("Weight and dimensions cannot be negative");
    }
    Ok(())
}
