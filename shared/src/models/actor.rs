//! Acting user and role checks

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    /// Prepares lines in the warehouses assigned to them
    Warehouse,
    /// Packs units and moves them through transit
    Dispatch,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Warehouse => "warehouse",
            Role::Dispatch => "dispatch",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "warehouse" => Some(Role::Warehouse),
            "dispatch" => Some(Role::Dispatch),
            _ => None,
        }
    }
}

/// Whoever is performing an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    /// Warehouse codes this user may prepare from
    #[serde(default)]
    pub warehouses: Vec<String>,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role, warehouses: Vec<String>) -> Self {
        Self {
            user_id,
            role,
            warehouses,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn manages_warehouse(&self, warehouse_code: &str) -> bool {
        let code = warehouse_code.trim();
        self.warehouses.iter().any(|w| w.trim() == code)
    }

    pub fn ensure_admin(&self, action: &str) -> DomainResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(DomainError::Permission(format!("only administrators may {}", action)))
        }
    }

    /// Admins prepare anywhere; warehouse staff only in their assigned warehouses.
    pub fn ensure_can_prepare(&self, warehouse_code: &str) -> DomainResult<()> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Warehouse if self.manages_warehouse(warehouse_code) => Ok(()),
            _ => Err(DomainError::Permission(format!(
                "not authorized to prepare lines in warehouse {}",
                warehouse_code.trim()
            ))),
        }
    }

    pub fn ensure_can_dispatch(&self) -> DomainResult<()> {
        match self.role {
            Role::Admin | Role::Dispatch => Ok(()),
            Role::Warehouse => Err(DomainError::Permission(
                "not authorized to handle shipment units".to_string(),
            )),
        }
    }
}
